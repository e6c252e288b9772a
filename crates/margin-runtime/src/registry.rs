//! Session registry: one top-level session per conversation.
//!
//! Each conversation gets a slot holding a `tokio::sync::OnceCell`, so
//! concurrent first prompts share one construction. Slots that fail to build
//! are removed so the next call retries. A reset removes the slot and tears
//! the session down exactly once, even when it races a construction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use margin_core::{ConversationId, Subscription, synthesized_agent_end};
use margin_settings::SessionSettings;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::RuntimeError;
use crate::factory::SessionFactory;
use crate::relay::{TranscriptSink, attach_primary};
use crate::session::{AgentSession, PromptOptions, PromptOutcome};

/// Default time an aborted session gets to confirm before a terminal event
/// is synthesized.
const DEFAULT_ABORT_GRACE: Duration = Duration::from_millis(500);

/// The live session behind one conversation.
pub struct ConversationSession {
    conversation_id: ConversationId,
    session: Arc<AgentSession>,
    prompt_token: Mutex<Option<CancellationToken>>,
    relay: Mutex<Option<Subscription>>,
    torn_down: AtomicBool,
}

impl ConversationSession {
    /// Conversation this session belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The wrapped session.
    pub fn session(&self) -> &Arc<AgentSession> {
        &self.session
    }

    /// Whether a prompt is in flight.
    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    fn begin_prompt(&self) -> Result<CancellationToken, RuntimeError> {
        let mut slot = self.prompt_token.lock();
        if slot.is_some() {
            return Err(RuntimeError::SessionBusy(self.conversation_id.to_string()));
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(token)
    }

    fn cancel_prompt(&self) {
        if let Some(token) = self.prompt_token.lock().as_ref() {
            token.cancel();
        }
    }

    /// Cancel, detach, dispose. Returns `true` for the call that did it.
    fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(token) = self.prompt_token.lock().take() {
            token.cancel();
        }
        drop(self.relay.lock().take());
        let _ = self.session.dispose();
        debug!(conversation_id = %self.conversation_id, "conversation session torn down");
        true
    }
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("conversation_id", &self.conversation_id)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Clears the per-prompt token when the prompt finishes or is dropped.
struct PromptGuard<'a>(&'a ConversationSession);

impl Drop for PromptGuard<'_> {
    fn drop(&mut self) {
        drop(self.0.prompt_token.lock().take());
    }
}

/// One registry slot.
#[derive(Default)]
struct Slot {
    cell: OnceCell<Arc<ConversationSession>>,
    reset: AtomicBool,
}

/// What to do with a freshly built session whose slot is no longer mapped.
enum Orphan {
    Keep,
    Reset,
    Superseded,
}

/// Owns every top-level conversation session.
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    sink: Arc<dyn TranscriptSink>,
    entries: DashMap<ConversationId, Arc<Slot>>,
    abort_grace: Duration,
    runtime: Option<Handle>,
}

impl SessionRegistry {
    /// Registry building sessions with `factory` and streaming transcripts
    /// to `sink`.
    ///
    /// When called inside a tokio runtime, that runtime is remembered so
    /// [`abort`](Self::abort) also works from threads outside it.
    pub fn new(factory: Arc<dyn SessionFactory>, sink: Arc<dyn TranscriptSink>) -> Self {
        Self {
            factory,
            sink,
            entries: DashMap::new(),
            abort_grace: DEFAULT_ABORT_GRACE,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Runtime used for abort bookkeeping when `abort` is called from a
    /// thread with no runtime of its own.
    #[must_use]
    pub fn with_runtime_handle(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Override the abort grace period.
    #[must_use]
    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    /// Take the abort grace period from settings.
    #[must_use]
    pub fn with_session_settings(self, settings: &SessionSettings) -> Self {
        self.with_abort_grace(Duration::from_millis(settings.abort_grace_ms))
    }

    /// The session for `conversation_id`, building it on first use.
    ///
    /// Concurrent callers for the same conversation share one construction.
    /// A failed construction leaves nothing behind. A reset that lands while
    /// the session is being built wins: the new session is torn down and this
    /// returns [`RuntimeError::SessionReset`].
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn get_or_create(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Arc<ConversationSession>, RuntimeError> {
        loop {
            let slot = Arc::clone(self.entries.entry(conversation_id.clone()).or_default().value());

            let built = slot
                .cell
                .get_or_try_init(|| self.build(conversation_id))
                .await
                .map(Arc::clone);
            let conversation = match built {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, category = e.category(), "session construction failed");
                    let _ = self.entries.remove_if(conversation_id, |_, s| {
                        Arc::ptr_eq(s, &slot) && !s.cell.initialized()
                    });
                    return Err(e);
                }
            };

            match self.settle_orphan(conversation_id, &slot) {
                Orphan::Keep => return Ok(conversation),
                Orphan::Reset => {
                    let _ = conversation.teardown();
                    return Err(RuntimeError::SessionReset(conversation_id.to_string()));
                }
                Orphan::Superseded => {
                    debug!("slot superseded, retrying");
                    let _ = conversation.teardown();
                }
            }
        }
    }

    /// Decide whether a built slot is still the conversation's slot. A slot
    /// dropped by a failed sibling construction is put back.
    fn settle_orphan(&self, conversation_id: &ConversationId, slot: &Arc<Slot>) -> Orphan {
        match self.entries.entry(conversation_id.clone()) {
            Entry::Occupied(o) if Arc::ptr_eq(o.get(), slot) => Orphan::Keep,
            _ if slot.reset.load(Ordering::SeqCst) => Orphan::Reset,
            Entry::Vacant(v) => {
                let _ = v.insert(Arc::clone(slot));
                Orphan::Keep
            }
            Entry::Occupied(_) => Orphan::Superseded,
        }
    }

    async fn build(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Arc<ConversationSession>, RuntimeError> {
        let session = self.factory.create(conversation_id).await?;
        let relay = attach_primary(&session, conversation_id.clone(), Arc::clone(&self.sink));
        info!("conversation session created");
        Ok(Arc::new(ConversationSession {
            conversation_id: conversation_id.clone(),
            session,
            prompt_token: Mutex::new(None),
            relay: Mutex::new(Some(relay)),
            torn_down: AtomicBool::new(false),
        }))
    }

    /// Run one prompt, building the session if needed.
    ///
    /// Fails with [`RuntimeError::SessionBusy`] while another prompt for the
    /// same conversation is running.
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn prompt(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<PromptOutcome, RuntimeError> {
        let conversation = self.get_or_create(conversation_id).await?;
        let cancellation = conversation.begin_prompt()?;
        let _guard = PromptGuard(&conversation);
        conversation
            .session
            .prompt(text, PromptOptions { cancellation })
            .await
    }

    /// Stop the in-flight prompt of `conversation_id`.
    ///
    /// Returns `false` (and does nothing) when no prompt is running. When the
    /// session has not settled after the abort grace period, a synthesized
    /// `agent_end` is delivered to the transcript sink.
    ///
    /// Safe to call from any thread. Without a reachable tokio runtime the
    /// prompt is still cancelled but no `agent_end` is synthesized.
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub fn abort(&self, conversation_id: &ConversationId) -> bool {
        let Some(conversation) = self.lookup(conversation_id) else {
            return false;
        };
        if !conversation.is_busy() {
            debug!("abort ignored: no prompt in flight");
            return false;
        }

        conversation.cancel_prompt();
        conversation.session.abort();

        let runtime = Handle::try_current().ok().or_else(|| self.runtime.clone());
        let Some(runtime) = runtime else {
            warn!("no tokio runtime reachable, skipping abort confirmation");
            return true;
        };
        let session = Arc::clone(&conversation.session);
        let sink = Arc::clone(&self.sink);
        let grace = self.abort_grace;
        let conversation_id = conversation_id.clone();
        let _ = runtime.spawn(async move {
            if tokio::time::timeout(grace, session.wait_settled()).await.is_err() {
                warn!(
                    conversation_id = %conversation_id,
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "session did not confirm abort, synthesizing agent_end"
                );
                sink.deliver(synthesized_agent_end(conversation_id.as_str()));
            }
        });
        true
    }

    /// Remove and dispose the session of `conversation_id`. Returns `true`
    /// for the call that disposed it.
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub fn reset(&self, conversation_id: &ConversationId) -> bool {
        // The flag is set under the shard lock so a construction finishing
        // concurrently sees it before it could re-insert the slot.
        let removed = self.entries.remove_if(conversation_id, |_, slot| {
            slot.reset.store(true, Ordering::SeqCst);
            true
        });
        removed
            .and_then(|(_, slot)| slot.cell.get().cloned())
            .is_some_and(|conversation| conversation.teardown())
    }

    /// Reset every conversation. Returns how many sessions were disposed.
    pub fn reset_all(&self) -> usize {
        let ids: Vec<ConversationId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.reset(id)).count()
    }

    /// App-wide teardown.
    pub fn shutdown(&self) {
        let disposed = self.reset_all();
        info!(disposed, "session registry shut down");
    }

    /// Whether `conversation_id` has a built session.
    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.lookup(conversation_id).is_some()
    }

    /// Number of built sessions.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.cell.initialized()).count()
    }

    /// Whether no session is built.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `conversation_id` has a prompt in flight.
    pub fn is_busy(&self, conversation_id: &ConversationId) -> bool {
        self.lookup(conversation_id).is_some_and(|c| c.is_busy())
    }

    fn lookup(&self, conversation_id: &ConversationId) -> Option<Arc<ConversationSession>> {
        self.entries
            .get(conversation_id)
            .and_then(|slot| slot.cell.get().cloned())
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("abort_grace", &self.abort_grace)
            .finish_non_exhaustive()
    }
}

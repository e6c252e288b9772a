//! `AgentSession`: one runtime session plus the bookkeeping the core needs.
//!
//! The wrapper tracks the per-prompt state machine from the session's own
//! event stream, keeps the last assistant message as the session's output,
//! and enforces one prompt in flight at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use margin_core::{AgentEvent, MessageRole, Subscription, TokenStats};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::errors::RuntimeError;
use crate::session::runtime::{
    AgentRuntime, CreateSessionOptions, PromptOptions, PromptOutcome, RuntimeSession,
};

/// Per-prompt session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No prompt running.
    Idle,
    /// Prompt accepted, no message streaming.
    Running,
    /// An assistant message is streaming.
    Streaming,
    /// The last prompt was aborted.
    Aborted,
}

impl SessionState {
    /// Whether no prompt is running.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Aborted)
    }
}

/// Shared between the session and its tracking listener.
struct Tracker {
    state: watch::Sender<SessionState>,
    last_output: Mutex<Option<String>>,
    turns: AtomicU32,
}

impl Tracker {
    fn observe(&self, event: &AgentEvent) {
        match event {
            AgentEvent::AgentStart => {
                let _ = self.state.send_replace(SessionState::Running);
            }
            AgentEvent::MessageStart {
                role: MessageRole::Assistant,
            } => {
                let _ = self.state.send_replace(SessionState::Streaming);
            }
            AgentEvent::MessageEnd {
                role: MessageRole::Assistant,
                text,
            } => {
                if !text.trim().is_empty() {
                    *self.last_output.lock() = Some(text.clone());
                }
                let _ = self.state.send_replace(SessionState::Running);
            }
            AgentEvent::TurnEnd { turn } => self.turns.store(*turn, Ordering::SeqCst),
            AgentEvent::AgentEnd { aborted, .. } => {
                let next = if *aborted {
                    SessionState::Aborted
                } else {
                    SessionState::Idle
                };
                let _ = self.state.send_replace(next);
            }
            _ => {}
        }
    }
}

/// Clears the in-flight flag when a prompt future finishes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle over one runtime session.
pub struct AgentSession {
    inner: Arc<dyn RuntimeSession>,
    tracker: Arc<Tracker>,
    tracking: Mutex<Option<Subscription>>,
    in_flight: AtomicBool,
    disposed: AtomicBool,
}

impl AgentSession {
    /// Create a runtime session and start tracking its events.
    pub async fn construct(
        runtime: &dyn AgentRuntime,
        options: CreateSessionOptions,
    ) -> Result<Arc<Self>, RuntimeError> {
        debug!(
            work_dir = %options.work_dir.display(),
            model = %options.model.model_id,
            "creating session"
        );
        let inner = runtime.create_session(options).await?;
        Ok(Arc::new(Self::wrap(inner)))
    }

    /// Wrap an existing runtime session.
    pub fn wrap(inner: Arc<dyn RuntimeSession>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let tracker = Arc::new(Tracker {
            state,
            last_output: Mutex::new(None),
            turns: AtomicU32::new(0),
        });
        let observer = Arc::clone(&tracker);
        let tracking = inner.subscribe(Arc::new(move |e: &AgentEvent| observer.observe(e)));
        Self {
            inner,
            tracker,
            tracking: Mutex::new(Some(tracking)),
            in_flight: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Run one prompt.
    ///
    /// Fails with [`RuntimeError::SessionBusy`] while another prompt is in
    /// flight and [`RuntimeError::SessionDisposed`] after [`dispose`](Self::dispose).
    pub async fn prompt(
        &self,
        text: &str,
        options: PromptOptions,
    ) -> Result<PromptOutcome, RuntimeError> {
        if self.is_disposed() {
            return Err(RuntimeError::SessionDisposed("prompt after dispose".into()));
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::SessionBusy(
                "a prompt is already running".into(),
            ));
        }
        let _in_flight = InFlight(&self.in_flight);

        *self.tracker.last_output.lock() = None;
        self.tracker.turns.store(0, Ordering::SeqCst);
        let _ = self.tracker.state.send_replace(SessionState::Running);

        let result = self.inner.prompt(text, options).await;

        // The runtime may return without a terminal event.
        let aborted = matches!(result, Ok(PromptOutcome::Aborted));
        let _ = self.tracker.state.send_if_modified(|s| {
            let next = if aborted || *s == SessionState::Aborted {
                SessionState::Aborted
            } else {
                SessionState::Idle
            };
            let changed = *s != next;
            *s = next;
            changed
        });
        result
    }

    /// Ask the in-flight prompt to stop.
    pub fn abort(&self) {
        if !self.is_disposed() {
            self.inner.abort();
        }
    }

    /// Release the runtime session. Returns `true` for the call that
    /// actually disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        drop(self.tracking.lock().take());
        self.inner.dispose();
        true
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether a prompt is in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.tracker.state.borrow()
    }

    /// Resolve once no prompt is running.
    pub async fn wait_settled(&self) {
        let mut rx = self.tracker.state.subscribe();
        let _ = rx.wait_for(|s| s.is_settled()).await;
    }

    /// Text of the last non-empty assistant message of the current or most
    /// recent prompt.
    pub fn last_output(&self) -> Option<String> {
        self.tracker.last_output.lock().clone()
    }

    /// Turns completed in the current or most recent prompt.
    pub fn turns(&self) -> u32 {
        self.tracker.turns.load(Ordering::SeqCst)
    }

    /// Register an event listener.
    pub fn subscribe(
        &self,
        listener: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.subscribe(Arc::new(listener))
    }

    /// Token counters, when the runtime can report them.
    pub fn stats(&self) -> Option<TokenStats> {
        self.inner.stats()
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("state", &self.state())
            .field("busy", &self.is_busy())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

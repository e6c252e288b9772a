//! Invocation-scoped cancellation.
//!
//! A [`CancellationScope`] merges three stop sources for one subagent
//! invocation into a single child token:
//!
//! - the caller's token (a conversation abort, or the dispatching prompt
//!   being cancelled)
//! - a wall-clock timer when the agent sets `timeoutMs`
//! - a turn counter on the invocation's own session when the agent sets
//!   `maxTurns`
//!
//! The first source to fire is recorded as the [`TerminationReason`] and the
//! session is aborted. Cancelling the scope never touches the parent token,
//! so a timeout in one parallel task leaves its siblings running.

use std::sync::Arc;
use std::time::Duration;

use margin_core::{AgentEvent, Subscription};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::AgentSession;

/// Limits applied to one invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InvocationPolicy {
    /// Stop once this many turns have completed.
    pub max_turns: Option<u32>,
    /// Stop after this much wall-clock time.
    pub timeout: Option<Duration>,
}

impl InvocationPolicy {
    /// Policy from agent config fields.
    pub fn new(max_turns: Option<u32>, timeout_ms: Option<u64>) -> Self {
        Self {
            max_turns,
            timeout: timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Why an invocation was stopped early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// The caller's token was cancelled.
    Caller,
    /// The configured timeout elapsed.
    Timeout(Duration),
    /// The configured turn limit was reached.
    TurnLimit(u32),
}

impl TerminationReason {
    /// Human-readable notice appended to the invocation output.
    pub fn notice(&self) -> String {
        match self {
            Self::Caller => "cancelled by caller".to_string(),
            Self::Timeout(d) => format!("reached {} timeout", format_duration(*d)),
            Self::TurnLimit(n) => format!("reached {n}-turn limit"),
        }
    }

    /// Whether this termination makes the invocation an error.
    ///
    /// Policy limits are not errors; caller cancellation is.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Caller)
    }

    /// Short label for structured details.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Caller => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::TurnLimit(_) => "turn_limit",
        }
    }
}

fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

type ReasonSlot = Arc<Mutex<Option<TerminationReason>>>;

/// Records `reason` unless another source already fired.
fn record(slot: &ReasonSlot, reason: TerminationReason) {
    let mut guard = slot.lock();
    if guard.is_none() {
        debug!(reason = reason.label(), "invocation termination");
        *guard = Some(reason);
    }
}

/// Merged stop signal for one invocation. Closing (or dropping) clears the
/// timer, detaches the turn listener, and stops the abort watcher.
pub struct CancellationScope {
    parent: CancellationToken,
    token: CancellationToken,
    reason: ReasonSlot,
    timer: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    turn_watch: Option<Subscription>,
}

impl CancellationScope {
    /// Arm a scope for `session` under `parent`, with the timeout counted
    /// from now.
    pub fn arm(
        parent: &CancellationToken,
        policy: &InvocationPolicy,
        session: Arc<AgentSession>,
    ) -> Self {
        Self::arm_from(parent, policy, session, Instant::now())
    }

    /// Like [`arm`](Self::arm), with the timeout counted from `started`. A
    /// deadline already in the past fires on the first poll of the timer.
    pub fn arm_from(
        parent: &CancellationToken,
        policy: &InvocationPolicy,
        session: Arc<AgentSession>,
        started: Instant,
    ) -> Self {
        let token = parent.child_token();
        let reason: ReasonSlot = Arc::new(Mutex::new(None));

        let timer = policy.timeout.map(|timeout| {
            let token = token.clone();
            let reason = Arc::clone(&reason);
            tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep_until(started + timeout) => {
                        record(&reason, TerminationReason::Timeout(timeout));
                        token.cancel();
                    }
                }
            })
        });

        let turn_watch = policy.max_turns.map(|max_turns| {
            let token = token.clone();
            let reason = Arc::clone(&reason);
            session.subscribe(move |event| {
                if let AgentEvent::TurnEnd { turn } = event {
                    if *turn >= max_turns && !token.is_cancelled() {
                        record(&reason, TerminationReason::TurnLimit(max_turns));
                        token.cancel();
                    }
                }
            })
        });

        let watcher = {
            let token = token.clone();
            let parent = parent.clone();
            let reason = Arc::clone(&reason);
            tokio::spawn(async move {
                token.cancelled().await;
                if parent.is_cancelled() {
                    record(&reason, TerminationReason::Caller);
                }
                session.abort();
            })
        };

        Self {
            parent: parent.clone(),
            token,
            reason,
            timer,
            watcher: Some(watcher),
            turn_watch,
        }
    }

    /// The merged token. Pass it to the prompt.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The reason recorded so far.
    pub fn reason(&self) -> Option<TerminationReason> {
        *self.reason.lock()
    }

    /// Tear down and return the recorded reason.
    pub fn close(mut self) -> Option<TerminationReason> {
        self.shutdown();
        self.reason()
    }

    fn shutdown(&mut self) {
        // The watcher may not have run yet when the prompt returns first.
        if self.token.is_cancelled() && self.parent.is_cancelled() {
            record(&self.reason, TerminationReason::Caller);
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        drop(self.turn_watch.take());
    }
}

impl Drop for CancellationScope {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Event relay.
//!
//! Turns a session's raw [`AgentEvent`] stream into what the host consumes:
//!
//! - [`attach_primary`]: the full transcript of a top-level conversation
//! - [`attach_subagent`]: tool activity only, tagged with the agent name
//!
//! Each attachment is an independent listener; dropping the returned
//! [`Subscription`] detaches it. Sinks whose destination is gone swallow
//! the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use margin_core::{
    AgentEvent, BaseEvent, ConversationId, SubagentActivity, Subscription, TokenStats,
    TranscriptEvent,
};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::session::AgentSession;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Destination for one conversation's transcript.
pub trait TranscriptSink: Send + Sync {
    /// Deliver an event. Never fails.
    fn deliver(&self, event: TranscriptEvent);
}

/// Destination for subagent tool activity.
pub trait ActivitySink: Send + Sync {
    /// Deliver an activity record. Never fails.
    fn deliver(&self, activity: SubagentActivity);
}

/// Broadcast-based sink.
///
/// Non-blocking: `emit` never awaits. Slow receivers lag rather than block
/// the sender.
pub struct BroadcastSink<E> {
    tx: broadcast::Sender<E>,
    emit_count: AtomicU64,
}

impl<E: Clone> BroadcastSink<E> {
    /// Create a sink with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a sink with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Send to all receivers. Returns how many received it.
    pub fn emit(&self, event: E) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Active receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total events emitted.
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}

impl<E: Clone> Default for BroadcastSink<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptSink for BroadcastSink<TranscriptEvent> {
    fn deliver(&self, event: TranscriptEvent) {
        if self.emit(event) == 0 {
            trace!("transcript event dropped: no receivers");
        }
    }
}

impl ActivitySink for BroadcastSink<SubagentActivity> {
    fn deliver(&self, activity: SubagentActivity) {
        if self.emit(activity) == 0 {
            trace!("subagent activity dropped: no receivers");
        }
    }
}

/// Unbounded channel sink for a single consumer.
#[derive(Clone)]
pub struct ChannelSink<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> ChannelSink<E> {
    /// Create a sink and its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TranscriptSink for ChannelSink<TranscriptEvent> {
    fn deliver(&self, event: TranscriptEvent) {
        if self.tx.send(event).is_err() {
            trace!("transcript receiver closed");
        }
    }
}

impl ActivitySink for ChannelSink<SubagentActivity> {
    fn deliver(&self, activity: SubagentActivity) {
        if self.tx.send(activity).is_err() {
            trace!("activity receiver closed");
        }
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TranscriptSink for NullSink {
    fn deliver(&self, _event: TranscriptEvent) {}
}

impl ActivitySink for NullSink {
    fn deliver(&self, _activity: SubagentActivity) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Map a runtime event to its transcript form. `turn_end` has none.
pub fn to_transcript(
    event: &AgentEvent,
    conversation_id: &ConversationId,
    stats: impl FnOnce() -> Option<TokenStats>,
) -> Option<TranscriptEvent> {
    let base = BaseEvent::now(conversation_id.as_str());
    let mapped = match event {
        AgentEvent::AgentStart => TranscriptEvent::AgentStart { base },
        AgentEvent::MessageStart { role } => TranscriptEvent::MessageStart { base, role: *role },
        AgentEvent::MessageUpdate { delta } => TranscriptEvent::MessageUpdate {
            base,
            delta: delta.clone(),
        },
        AgentEvent::MessageEnd { role, text } => TranscriptEvent::MessageEnd {
            base,
            role: *role,
            text: text.clone(),
        },
        AgentEvent::ToolExecutionStart {
            tool_call_id,
            tool_name,
            arguments,
        } => TranscriptEvent::ToolStart {
            base,
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            arguments: arguments.clone(),
        },
        AgentEvent::ToolExecutionEnd {
            tool_call_id,
            tool_name,
            is_error,
            result,
        } => TranscriptEvent::ToolEnd {
            base,
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            is_error: *is_error,
            result: result.clone(),
        },
        AgentEvent::AgentEnd { aborted, error } => TranscriptEvent::AgentEnd {
            base,
            token_stats: stats(),
            aborted: *aborted,
            synthesized: false,
            error: error.clone(),
        },
        AgentEvent::TurnEnd { .. } => return None,
    };
    Some(mapped)
}

/// Map a runtime event to subagent activity. Only tool events map.
pub fn to_activity(event: &AgentEvent, agent_name: &str) -> Option<SubagentActivity> {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match event {
        AgentEvent::ToolExecutionStart {
            tool_call_id,
            tool_name,
            arguments,
        } => Some(SubagentActivity::ToolStart {
            agent: agent_name.to_string(),
            timestamp,
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            arguments: arguments.clone(),
        }),
        AgentEvent::ToolExecutionEnd {
            tool_call_id,
            tool_name,
            is_error,
            ..
        } => Some(SubagentActivity::ToolEnd {
            agent: agent_name.to_string(),
            timestamp,
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            is_error: *is_error,
        }),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attachments
// ─────────────────────────────────────────────────────────────────────────────

/// Forward a top-level session's transcript to `sink`.
pub fn attach_primary(
    session: &Arc<AgentSession>,
    conversation_id: ConversationId,
    sink: Arc<dyn TranscriptSink>,
) -> Subscription {
    // Weak: the listener lives inside the session it reads stats from.
    let weak: Weak<AgentSession> = Arc::downgrade(session);
    session.subscribe(move |event| {
        let stats = || weak.upgrade().and_then(|s| s.stats());
        if let Some(mapped) = to_transcript(event, &conversation_id, stats) {
            sink.deliver(mapped);
        }
    })
}

/// Forward a subagent session's tool activity to `sink`, tagged with
/// `agent_name`.
pub fn attach_subagent(
    session: &AgentSession,
    agent_name: &str,
    sink: Arc<dyn ActivitySink>,
) -> Subscription {
    let agent_name = agent_name.to_string();
    session.subscribe(move |event| {
        if let Some(activity) = to_activity(event, &agent_name) {
            sink.deliver(activity);
        }
    })
}

//! Scripted in-process runtime for tests.
//!
//! Each prompt plays a [`Script`]: a number of turns, optional tool calls on
//! the first turn, and a final reply. Custom tools named in a script are
//! really executed, so a scripted top-level session can drive the
//! dispatcher end to end.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use margin_core::{AgentEvent, Listener, ListenerSet, MessageRole, Subscription, TokenStats};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::RuntimeError;
use crate::session::runtime::{
    AgentRuntime, CreateSessionOptions, Credentials, ModelResolver, PromptOptions, PromptOutcome,
    ResolvedModel, RuntimeSession, StaticResourceLoader, ToolSelection,
};
use crate::tool::{CustomTool, ToolContext};

// ─────────────────────────────────────────────────────────────────────────────
// Script
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub(crate) struct Script {
    pub text: String,
    pub turns: u32,
    pub turn_delay: Duration,
    pub tool_calls: Vec<(String, Value)>,
    pub error: Option<String>,
    pub ignore_abort: bool,
}

impl Script {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            turns: 1,
            turn_delay: Duration::ZERO,
            tool_calls: Vec::new(),
            error: None,
            ignore_abort: false,
        }
    }

    pub fn turns(mut self, turns: u32) -> Self {
        self.turns = turns.max(1);
        self
    }

    pub fn turn_delay(mut self, delay: Duration) -> Self {
        self.turn_delay = delay;
        self
    }

    pub fn tool_call(mut self, name: impl Into<String>, args: Value) -> Self {
        self.tool_calls.push((name.into(), args));
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn ignore_abort(mut self) -> Self {
        self.ignore_abort = true;
        self
    }
}

type ScriptFn = Arc<dyn Fn(&str, &str) -> Script + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Counters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub(crate) struct CreatedSession {
    pub system_prompt: Option<String>,
    pub tools: ToolSelection,
    pub model_id: String,
    pub custom_tools: Vec<String>,
}

#[derive(Default)]
pub(crate) struct Counters {
    created: AtomicUsize,
    disposed: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    prompts: Mutex<Vec<(String, String)>>,
    sessions: Mutex<Vec<CreatedSession>>,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// `(system prompt, task)` for every prompt, in start order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }

    /// Tasks prompted to sessions whose system prompt equals `system_prompt`.
    pub fn tasks_for(&self, system_prompt: &str) -> Vec<String> {
        self.prompts
            .lock()
            .iter()
            .filter(|(s, _)| s == system_prompt)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn sessions(&self) -> Vec<CreatedSession> {
        self.sessions.lock().clone()
    }

    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(Arc::clone(self))
    }
}

struct ActiveGuard(Arc<Counters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let _ = self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct ScriptedRuntime {
    script: ScriptFn,
    counters: Arc<Counters>,
    create_delay: Duration,
    failing_creates: AtomicUsize,
}

impl ScriptedRuntime {
    /// `script(system_prompt, task)` picks the script for each prompt.
    pub fn new(script: impl Fn(&str, &str) -> Script + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            counters: Arc::new(Counters::default()),
            create_delay: Duration::ZERO,
            failing_creates: AtomicUsize::new(0),
        }
    }

    /// Replies `echo: <task>`.
    pub fn echo() -> Self {
        Self::new(|_, task| Script::reply(format!("echo: {task}")))
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// The next `n` session creations fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Options for a plain session with `system_prompt`.
    pub fn options(&self, system_prompt: &str) -> CreateSessionOptions {
        CreateSessionOptions {
            work_dir: PathBuf::from("/vault"),
            model: test_model("test-model"),
            tools: ToolSelection::Default,
            custom_tools: Vec::new(),
            resources: Arc::new(StaticResourceLoader::default()),
            thinking_level: "medium".into(),
            system_prompt: Some(system_prompt.to_string()),
        }
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn create_session(
        &self,
        options: CreateSessionOptions,
    ) -> Result<Arc<dyn RuntimeSession>, RuntimeError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(RuntimeError::Configuration("scripted create failure".into()));
        }

        let _ = self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.counters.sessions.lock().push(CreatedSession {
            system_prompt: options.system_prompt.clone(),
            tools: options.tools.clone(),
            model_id: options.model.model_id.clone(),
            custom_tools: options
                .custom_tools
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        });

        Ok(Arc::new(ScriptedSession {
            script: Arc::clone(&self.script),
            system_prompt: options.system_prompt.unwrap_or_default(),
            work_dir: options.work_dir,
            custom_tools: options.custom_tools,
            listeners: ListenerSet::new(),
            abort: Mutex::new(CancellationToken::new()),
            stats: Mutex::new(None),
            counters: Arc::clone(&self.counters),
        }))
    }
}

pub(crate) fn test_model(model_id: &str) -> ResolvedModel {
    ResolvedModel {
        provider: "test".into(),
        model_id: model_id.into(),
        credentials: Credentials::new("test-key"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

struct ScriptedSession {
    script: ScriptFn,
    system_prompt: String,
    work_dir: PathBuf,
    custom_tools: Vec<Arc<dyn CustomTool>>,
    listeners: ListenerSet<AgentEvent>,
    abort: Mutex<CancellationToken>,
    stats: Mutex<Option<TokenStats>>,
    counters: Arc<Counters>,
}

impl ScriptedSession {
    async fn run_tool(
        &self,
        name: &str,
        args: &Value,
        tool_call_id: &str,
        options: &PromptOptions,
    ) -> (String, bool) {
        let Some(tool) = self.custom_tools.iter().find(|t| t.name() == name) else {
            return (format!("{name} ok"), false);
        };
        let ctx = ToolContext {
            tool_call_id: tool_call_id.to_string(),
            conversation_id: None,
            working_directory: self.work_dir.clone(),
            cancellation: options.cancellation.clone(),
        };
        match tool.execute(args.clone(), &ctx).await {
            Ok(out) => (out.content, out.is_error),
            Err(e) => (e.to_string(), true),
        }
    }

    fn should_stop(script: &Script, abort: &CancellationToken, options: &PromptOptions) -> bool {
        !script.ignore_abort && (abort.is_cancelled() || options.cancellation.is_cancelled())
    }
}

#[async_trait]
impl RuntimeSession for ScriptedSession {
    async fn prompt(
        &self,
        text: &str,
        options: PromptOptions,
    ) -> Result<PromptOutcome, RuntimeError> {
        let script = (self.script)(&self.system_prompt, text);
        self.counters
            .prompts
            .lock()
            .push((self.system_prompt.clone(), text.to_string()));
        let abort = CancellationToken::new();
        *self.abort.lock() = abort.clone();
        let _active = self.counters.enter();

        let emit = |event: AgentEvent| self.listeners.emit(&event);
        emit(AgentEvent::AgentStart);

        let mut aborted = false;
        for turn in 1..=script.turns {
            if !script.turn_delay.is_zero() {
                if script.ignore_abort {
                    tokio::time::sleep(script.turn_delay).await;
                } else {
                    tokio::select! {
                        () = tokio::time::sleep(script.turn_delay) => {}
                        () = abort.cancelled() => { aborted = true; break; }
                        () = options.cancellation.cancelled() => { aborted = true; break; }
                    }
                }
            }

            if turn == 1 {
                for (i, (name, args)) in script.tool_calls.iter().enumerate() {
                    let id = format!("call-{i}");
                    emit(AgentEvent::ToolExecutionStart {
                        tool_call_id: id.clone(),
                        tool_name: name.clone(),
                        arguments: args.clone(),
                    });
                    let (result, is_error) = self.run_tool(name, args, &id, &options).await;
                    emit(AgentEvent::ToolExecutionEnd {
                        tool_call_id: id,
                        tool_name: name.clone(),
                        is_error,
                        result: Some(result),
                    });
                }
            }

            let reply = if turn == script.turns {
                script.text.clone()
            } else {
                format!("working (turn {turn})")
            };
            emit(AgentEvent::MessageStart {
                role: MessageRole::Assistant,
            });
            emit(AgentEvent::MessageUpdate {
                delta: reply.clone(),
            });
            emit(AgentEvent::MessageEnd {
                role: MessageRole::Assistant,
                text: reply,
            });
            emit(AgentEvent::TurnEnd { turn });

            if Self::should_stop(&script, &abort, &options) {
                aborted = turn < script.turns;
                break;
            }
        }

        *self.stats.lock() = Some(TokenStats {
            input_tokens: text.len() as u64,
            output_tokens: script.text.len() as u64,
            ..TokenStats::default()
        });

        if let Some(error) = script.error {
            emit(AgentEvent::AgentEnd {
                aborted: false,
                error: Some(error.clone()),
            });
            return Err(RuntimeError::Prompt(error));
        }

        emit(AgentEvent::AgentEnd {
            aborted,
            error: None,
        });
        Ok(if aborted {
            PromptOutcome::Aborted
        } else {
            PromptOutcome::Completed
        })
    }

    fn abort(&self) {
        self.abort.lock().cancel();
    }

    fn dispose(&self) {
        let _ = self.counters.disposed.fetch_add(1, Ordering::SeqCst);
        self.listeners.clear();
    }

    fn subscribe(&self, listener: Listener<AgentEvent>) -> Subscription {
        self.listeners.subscribe(move |e| listener(e))
    }

    fn stats(&self) -> Option<TokenStats> {
        self.stats.lock().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves every model except the ones marked missing.
#[derive(Default)]
pub(crate) struct ScriptedResolver {
    missing: Mutex<HashSet<String>>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(self, model: &str) -> Self {
        let _ = self.missing.lock().insert(model.to_string());
        self
    }
}

#[async_trait]
impl ModelResolver for ScriptedResolver {
    async fn resolve(&self, model: Option<&str>) -> Result<ResolvedModel, RuntimeError> {
        let id = model.unwrap_or("test-model");
        if self.missing.lock().contains(id) {
            return Err(RuntimeError::Configuration(format!(
                "no credentials for model {id}"
            )));
        }
        Ok(test_model(id))
    }
}

//! One subordinate agent execution.
//!
//! [`run_invocation`] builds a fresh session for an [`AgentConfig`], runs a
//! single task under a [`CancellationScope`], and always resolves to a
//! [`SubagentResult`]. Every failure on the way (model resolution, session
//! construction, the prompt itself) is folded into the result. The session is
//! disposed exactly once on every path, including the future being dropped.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use margin_agents::AgentConfig;
use margin_core::{InvocationId, text};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cancellation::{CancellationScope, InvocationPolicy, TerminationReason};
use crate::relay::{ActivitySink, NullSink, attach_subagent};
use crate::session::{
    AgentRuntime, AgentSession, CreateSessionOptions, ModelResolver, PromptOptions,
    ResourceLoader, StaticResourceLoader, ToolSelection,
};

/// Shown when a subagent finishes without any assistant text.
const NO_OUTPUT: &str = "(no output)";

/// Collaborators shared by every invocation of one dispatcher.
#[derive(Clone)]
pub struct InvocationContext {
    runtime: Arc<dyn AgentRuntime>,
    resolver: Arc<dyn ModelResolver>,
    resources: Arc<dyn ResourceLoader>,
    activity: Arc<dyn ActivitySink>,
    thinking_level: String,
    default_model: Option<String>,
}

impl InvocationContext {
    /// Context with no extra resources and activity discarded.
    pub fn new(runtime: Arc<dyn AgentRuntime>, resolver: Arc<dyn ModelResolver>) -> Self {
        Self {
            runtime,
            resolver,
            resources: Arc::new(StaticResourceLoader::default()),
            activity: Arc::new(NullSink),
            thinking_level: "medium".to_string(),
            default_model: None,
        }
    }

    /// Extra prompt material for subagent sessions.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn ResourceLoader>) -> Self {
        self.resources = resources;
        self
    }

    /// Where subagent tool activity goes.
    #[must_use]
    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = sink;
        self
    }

    /// Reasoning effort for subagent sessions.
    #[must_use]
    pub fn with_thinking_level(mut self, level: impl Into<String>) -> Self {
        self.thinking_level = level.into();
        self
    }

    /// Model used when an agent has no override.
    #[must_use]
    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model;
        self
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("thinking_level", &self.thinking_level)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

/// Outcome of one invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubagentResult {
    /// Agent that ran.
    pub agent: String,
    /// Final assistant text, or the failure message, plus any notice.
    pub output: String,
    /// Whether the invocation failed.
    pub is_error: bool,
    /// Which stop source fired, if any.
    pub termination: Option<TerminationReason>,
    /// Turns completed.
    pub turns: u32,
    /// Wall-clock time from start to disposal.
    pub duration: Duration,
}

impl SubagentResult {
    /// An error result for an invocation that never ran.
    pub(crate) fn not_run(agent: &str, output: impl Into<String>) -> Self {
        Self {
            agent: agent.to_string(),
            output: output.into(),
            is_error: true,
            termination: None,
            turns: 0,
            duration: Duration::ZERO,
        }
    }

    fn failed(agent: &str, output: String, started: Instant) -> Self {
        Self {
            agent: agent.to_string(),
            output,
            is_error: true,
            termination: None,
            turns: 0,
            duration: started.elapsed(),
        }
    }

    /// Stopped before the prompt was sent.
    fn stopped(agent: &str, reason: TerminationReason, started: Instant) -> Self {
        let output = match reason {
            TerminationReason::Caller => format!("Not started: {}", reason.notice()),
            _ => format!("{NO_OUTPUT}\n\n[{}]", reason.notice()),
        };
        Self {
            agent: agent.to_string(),
            output,
            is_error: reason.is_error(),
            termination: Some(reason),
            turns: 0,
            duration: started.elapsed(),
        }
    }

    /// Whether the timeout fired.
    pub fn hit_timeout(&self) -> bool {
        matches!(self.termination, Some(TerminationReason::Timeout(_)))
    }

    /// Whether the turn limit fired.
    pub fn hit_turn_limit(&self) -> bool {
        matches!(self.termination, Some(TerminationReason::TurnLimit(_)))
    }

    /// `"ok"` or `"error"`.
    pub fn status(&self) -> &'static str {
        if self.is_error { "error" } else { "ok" }
    }
}

/// Disposes the session when dropped.
struct DisposeGuard(Arc<AgentSession>);

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        let _ = self.0.dispose();
    }
}

/// Run `task` on a fresh session for `agent`.
///
/// `cancel` is the caller's token. A token that is already cancelled means
/// the invocation never starts.
pub async fn run_invocation(
    ctx: &InvocationContext,
    agent: &AgentConfig,
    task: &str,
    cwd: &Path,
    cancel: &CancellationToken,
) -> SubagentResult {
    let invocation_id = InvocationId::new();
    let span = info_span!(
        "subagent",
        invocation_id = %invocation_id,
        agent = %agent.name,
        max_turns = agent.max_turns,
        timeout_ms = agent.timeout_ms,
    );
    execute(ctx, agent, task, cwd, cancel).instrument(span).await
}

/// Resolves once the invocation's timeout has elapsed, counted from
/// `started`. Never resolves without a timeout.
async fn deadline(started: Instant, timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => {
            tokio::time::sleep_until(started + timeout).await;
            timeout
        }
        None => std::future::pending().await,
    }
}

/// Resolve the model and build the session.
async fn prepare(
    ctx: &InvocationContext,
    agent: &AgentConfig,
    cwd: &Path,
) -> Result<Arc<AgentSession>, String> {
    let model = agent.model.as_deref().or(ctx.default_model.as_deref());
    let model = ctx.resolver.resolve(model).await.map_err(|e| {
        warn!(error = %e, category = e.category(), "model resolution failed");
        format!("Failed to start agent \"{}\": {e}", agent.name)
    })?;

    let options = CreateSessionOptions {
        work_dir: cwd.to_path_buf(),
        model,
        tools: ToolSelection::from_allow_list(agent.tools.as_deref()),
        custom_tools: Vec::new(),
        resources: Arc::clone(&ctx.resources),
        thinking_level: ctx.thinking_level.clone(),
        system_prompt: Some(agent.system_prompt.clone()).filter(|p| !p.is_empty()),
    };
    AgentSession::construct(ctx.runtime.as_ref(), options)
        .await
        .map_err(|e| {
            warn!(error = %e, category = e.category(), "session construction failed");
            format!("Failed to start agent \"{}\": {e}", agent.name)
        })
}

async fn execute(
    ctx: &InvocationContext,
    agent: &AgentConfig,
    task: &str,
    cwd: &Path,
    cancel: &CancellationToken,
) -> SubagentResult {
    let started = Instant::now();
    if cancel.is_cancelled() {
        debug!("caller cancelled before start");
        return SubagentResult::stopped(&agent.name, TerminationReason::Caller, started);
    }

    // The timeout covers model resolution and session construction too.
    let policy = InvocationPolicy::new(agent.max_turns, agent.timeout_ms);
    let prepared = tokio::select! {
        prepared = prepare(ctx, agent, cwd) => prepared,
        timeout = deadline(started, policy.timeout) => {
            debug!("timed out before the prompt was sent");
            let reason = TerminationReason::Timeout(timeout);
            return SubagentResult::stopped(&agent.name, reason, started);
        }
        () = cancel.cancelled() => {
            debug!("caller cancelled during startup");
            return SubagentResult::stopped(&agent.name, TerminationReason::Caller, started);
        }
    };
    let session = match prepared {
        Ok(s) => s,
        Err(message) => return SubagentResult::failed(&agent.name, message, started),
    };

    // Declared first so it drops after the scope and the activity listener.
    let _dispose = DisposeGuard(Arc::clone(&session));
    let activity = attach_subagent(&session, &agent.name, Arc::clone(&ctx.activity));
    let scope = CancellationScope::arm_from(cancel, &policy, Arc::clone(&session), started);

    debug!(task = %text::preview(task, 120), "prompting subagent");
    let outcome = session
        .prompt(
            task,
            PromptOptions {
                cancellation: scope.token().clone(),
            },
        )
        .await;

    let termination = scope.close();
    activity.unsubscribe();

    let (mut output, mut is_error) = match outcome {
        Ok(_) => (
            session
                .last_output()
                .unwrap_or_else(|| NO_OUTPUT.to_string()),
            false,
        ),
        Err(e) => (e.to_string(), true),
    };
    if let Some(reason) = termination {
        output.push_str(&format!("\n\n[{}]", reason.notice()));
        is_error |= reason.is_error();
    }

    let result = SubagentResult {
        agent: agent.name.clone(),
        output,
        is_error,
        termination,
        turns: session.turns(),
        duration: started.elapsed(),
    };
    info!(
        turns = result.turns,
        duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
        status = result.status(),
        termination = termination.as_ref().map(TerminationReason::label),
        "subagent execution finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ChannelSink;
    use crate::testing::{Script, ScriptedResolver, ScriptedRuntime};
    use margin_core::SubagentActivity;
    use serde_json::json;
    use std::path::PathBuf;

    fn ctx(rt: &Arc<ScriptedRuntime>) -> InvocationContext {
        InvocationContext::new(rt.clone(), Arc::new(ScriptedResolver::new()))
    }

    fn planner() -> AgentConfig {
        AgentConfig::new("planner", "Plans work").with_system_prompt("You plan.")
    }

    fn cwd() -> PathBuf {
        PathBuf::from("/vault")
    }

    async fn run(ctx: &InvocationContext, agent: &AgentConfig, task: &str) -> SubagentResult {
        run_invocation(ctx, agent, task, &cwd(), &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn returns_last_output_and_disposes() {
        let rt = Arc::new(ScriptedRuntime::new(|_, task| {
            Script::reply(format!("plan for {task}")).tool_call("read", json!({"path": "a.md"}))
        }));
        let (sink, mut rx) = ChannelSink::<SubagentActivity>::channel();
        let ctx = ctx(&rt).with_activity_sink(Arc::new(sink));

        let result = run(&ctx, &planner(), "outline X").await;
        assert!(!result.is_error);
        assert_eq!(result.output, "plan for outline X");
        assert_eq!(result.termination, None);
        assert_eq!(result.turns, 1);

        let counters = rt.counters();
        assert_eq!(counters.created(), 1);
        assert_eq!(counters.disposed(), 1);
        assert_eq!(counters.tasks_for("You plan."), vec!["outline X"]);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.agent(), "planner");
        assert_eq!(first.tool_name(), "read");
    }

    #[tokio::test]
    async fn session_gets_agent_tools_and_model() {
        let rt = Arc::new(ScriptedRuntime::echo());
        let agent = planner().with_tools(["read", "grep"]).with_model("fast-model");
        let _ = run(&ctx(&rt), &agent, "go").await;

        let created = rt.counters().sessions();
        assert_eq!(created[0].model_id, "fast-model");
        assert_eq!(
            created[0].tools,
            ToolSelection::Only(vec!["read".into(), "grep".into()])
        );
        assert!(created[0].custom_tools.is_empty());
    }

    #[tokio::test]
    async fn default_model_applies_without_override() {
        let rt = Arc::new(ScriptedRuntime::echo());
        let ctx = ctx(&rt).with_default_model(Some("house-model".into()));
        let _ = run(&ctx, &planner(), "go").await;
        assert_eq!(rt.counters().sessions()[0].model_id, "house-model");
    }

    #[tokio::test]
    async fn resolution_failure_is_an_error_result() {
        let rt = Arc::new(ScriptedRuntime::echo());
        let resolver = ScriptedResolver::new().without("gone");
        let ctx = InvocationContext::new(rt.clone(), Arc::new(resolver));
        let agent = planner().with_model("gone");

        let result = run(&ctx, &agent, "go").await;
        assert!(result.is_error);
        assert!(result.output.contains("no credentials for model gone"));
        assert_eq!(rt.counters().created(), 0);
    }

    #[tokio::test]
    async fn construction_failure_is_an_error_result() {
        let rt = Arc::new(ScriptedRuntime::echo());
        rt.fail_next_creates(1);
        let result = run(&ctx(&rt), &planner(), "go").await;
        assert!(result.is_error);
        assert!(result.output.starts_with("Failed to start agent \"planner\""));
        assert_eq!(rt.counters().disposed(), 0);
    }

    #[tokio::test]
    async fn prompt_failure_is_an_error_result() {
        let rt = Arc::new(ScriptedRuntime::new(|_, _| {
            Script::reply("partial").fail("model overloaded")
        }));
        let result = run(&ctx(&rt), &planner(), "go").await;
        assert!(result.is_error);
        assert_eq!(result.output, "Prompt failed: model overloaded");
        assert_eq!(rt.counters().disposed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_appends_notice_without_error() {
        let rt = Arc::new(ScriptedRuntime::new(|_, _| {
            Script::reply("never").turns(3).turn_delay(Duration::from_secs(10))
        }));
        let agent = planner().with_timeout_ms(2_000);

        let result = run(&ctx(&rt), &agent, "slow").await;
        assert!(!result.is_error);
        assert!(result.hit_timeout());
        assert!(!result.hit_turn_limit());
        assert_eq!(result.output, "(no output)\n\n[reached 2s timeout]");
        assert!(result.duration >= Duration::from_secs(2));
        assert!(result.duration < Duration::from_secs(3));
        assert_eq!(rt.counters().disposed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_includes_session_startup() {
        let rt = Arc::new(
            ScriptedRuntime::new(|_, _| Script::reply("never").turn_delay(Duration::from_secs(60)))
                .with_create_delay(Duration::from_secs(1)),
        );
        let agent = planner().with_timeout_ms(2_000);

        let result = run(&ctx(&rt), &agent, "slow").await;
        assert!(result.hit_timeout());
        assert_eq!(result.output, "(no output)\n\n[reached 2s timeout]");
        assert!(result.duration >= Duration::from_secs(2));
        assert!(result.duration < Duration::from_millis(2_100));
        assert_eq!(rt.counters().disposed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_during_startup_skips_the_prompt() {
        let rt = Arc::new(ScriptedRuntime::echo().with_create_delay(Duration::from_secs(5)));
        let agent = planner().with_timeout_ms(2_000);

        let result = run(&ctx(&rt), &agent, "slow").await;
        assert!(!result.is_error);
        assert!(result.hit_timeout());
        assert_eq!(result.output, "(no output)\n\n[reached 2s timeout]");
        assert_eq!(result.duration, Duration::from_secs(2));
        assert_eq!(result.turns, 0);
        assert_eq!(rt.counters().created(), 0);
        assert!(rt.counters().prompts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_during_startup() {
        let rt = Arc::new(ScriptedRuntime::echo().with_create_delay(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let _timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = run_invocation(&ctx(&rt), &planner(), "go", &cwd(), &cancel).await;
        assert!(result.is_error);
        assert_eq!(result.termination, Some(TerminationReason::Caller));
        assert_eq!(result.output, "Not started: cancelled by caller");
        assert_eq!(rt.counters().created(), 0);
    }

    #[tokio::test]
    async fn turn_limit_keeps_accumulated_output() {
        let rt = Arc::new(ScriptedRuntime::new(|_, _| Script::reply("final").turns(5)));
        let agent = planner().with_max_turns(2);

        let result = run(&ctx(&rt), &agent, "loop").await;
        assert!(!result.is_error);
        assert!(result.hit_turn_limit());
        assert_eq!(result.turns, 2);
        assert_eq!(result.output, "working (turn 2)\n\n[reached 2-turn limit]");
    }

    #[tokio::test]
    async fn precancelled_caller_skips_execution() {
        let rt = Arc::new(ScriptedRuntime::echo());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_invocation(&ctx(&rt), &planner(), "go", &cwd(), &cancel).await;
        assert!(result.is_error);
        assert_eq!(result.termination, Some(TerminationReason::Caller));
        assert_eq!(rt.counters().created(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_is_an_error() {
        let rt = Arc::new(ScriptedRuntime::new(|_, _| {
            Script::reply("late").turns(2).turn_delay(Duration::from_secs(10))
        }));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let _timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = run_invocation(&ctx(&rt), &planner(), "go", &cwd(), &cancel).await;
        assert!(result.is_error);
        assert_eq!(result.termination, Some(TerminationReason::Caller));
        assert!(result.output.ends_with("[cancelled by caller]"));
        assert_eq!(rt.counters().disposed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_invocation_still_disposes() {
        let rt = Arc::new(ScriptedRuntime::new(|_, _| {
            Script::reply("x").turn_delay(Duration::from_secs(60))
        }));
        let ctx = ctx(&rt);
        let agent = planner();
        let cwd = cwd();
        let token = CancellationToken::new();
        let fut = run_invocation(&ctx, &agent, "go", &cwd, &token);
        let timed = tokio::time::timeout(Duration::from_secs(1), fut).await;
        assert!(timed.is_err());
        assert_eq!(rt.counters().created(), 1);
        assert_eq!(rt.counters().disposed(), 1);
    }
}

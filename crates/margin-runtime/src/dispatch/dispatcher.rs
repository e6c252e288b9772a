//! The `subagent` tool.
//!
//! Delegates tasks to named agents in one of three modes:
//!
//! - **single** `{agent, task}`: one invocation, output returned as-is
//! - **parallel** `{tasks: [...]}`: every task runs, at most
//!   `parallelConcurrency` at once, reported in request order
//! - **chain** `{chain: [...]}`: steps run in order, each step's
//!   placeholder replaced with the previous output; the first failure halts
//!
//! The catalog is consulted on every call, so agent edits apply to the next
//! dispatch. Nothing here returns a fault to the runtime: bad requests and
//! failed invocations become error results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use margin_agents::{AgentCatalog, AgentConfig};
use margin_settings::DispatchSettings;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::dispatch::report;
use crate::dispatch::request::{DispatchParams, DispatchRequest, DispatchValidationError, TaskSpec};
use crate::errors::RuntimeError;
use crate::executor::map_bounded;
use crate::invocation::{InvocationContext, SubagentResult, run_invocation};
use crate::tool::{CustomTool, ToolContext, ToolDefinition, ToolOutput};

/// Tool name the runtime exposes to the model.
pub const SUBAGENT_TOOL_NAME: &str = "subagent";

/// Dispatches work to named subordinate agents.
pub struct SubagentDispatcher {
    catalog: Arc<dyn AgentCatalog>,
    invocation: InvocationContext,
    settings: DispatchSettings,
}

impl SubagentDispatcher {
    /// Dispatcher with default limits.
    pub fn new(catalog: Arc<dyn AgentCatalog>, invocation: InvocationContext) -> Self {
        Self {
            catalog,
            invocation,
            settings: DispatchSettings::default(),
        }
    }

    /// Override limits, placeholder, and default scope.
    #[must_use]
    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Handle one tool call. `cwd` is the calling session's working
    /// directory; `cancel` is the calling prompt's token.
    #[instrument(skip_all, fields(tool = SUBAGENT_TOOL_NAME, mode))]
    pub async fn dispatch(
        &self,
        params: Value,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        let params = match DispatchParams::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                let agents = self.catalog.discover_agents(self.settings.default_scope, cwd);
                return rejected(&e, &agents);
            }
        };

        let scope = params.agent_scope.unwrap_or(self.settings.default_scope);
        let cwd = resolve_cwd(cwd, params.cwd.as_deref());
        let agents = self.catalog.discover_agents(scope, &cwd);

        let request = match params
            .into_request(self.settings.max_parallel_tasks)
            .and_then(|r| r.validate_agents(&agents).map(|()| r))
        {
            Ok(r) => r,
            Err(e) => return rejected(&e, &agents),
        };
        let _ = tracing::Span::current().record("mode", request.mode());
        debug!(tasks = request.tasks().len(), cwd = %cwd.display(), "dispatching");

        match request {
            DispatchRequest::Single(spec) => {
                let result = self.run_spec(&agents, &spec.agent, &spec.task, &cwd, cancel).await;
                let details = report::details("single", std::slice::from_ref(&result));
                ToolOutput {
                    content: result.output,
                    is_error: result.is_error,
                    details: Some(details),
                }
            }
            DispatchRequest::Parallel(specs) => {
                let results = self.run_parallel(&agents, specs, &cwd, cancel).await;
                let (content, is_error) = report::parallel_report(&results);
                ToolOutput {
                    content,
                    is_error,
                    details: Some(report::details("parallel", &results)),
                }
            }
            DispatchRequest::Chain(steps) => {
                let results = self.run_chain(&agents, &steps, &cwd, cancel).await;
                let (content, is_error) = report::chain_report(&results);
                ToolOutput {
                    content,
                    is_error,
                    details: Some(report::details("chain", &results)),
                }
            }
        }
    }

    async fn run_spec(
        &self,
        agents: &BTreeMap<String, AgentConfig>,
        agent: &str,
        task: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> SubagentResult {
        match agents.get(agent) {
            Some(config) => run_invocation(&self.invocation, config, task, cwd, cancel).await,
            None => SubagentResult::not_run(agent, format!("Unknown agent: {agent}")),
        }
    }

    async fn run_parallel(
        &self,
        agents: &BTreeMap<String, AgentConfig>,
        specs: Vec<TaskSpec>,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Vec<SubagentResult> {
        let names: Vec<String> = specs.iter().map(|s| s.agent.clone()).collect();
        let outcomes = map_bounded(specs, self.settings.parallel_concurrency, |_, spec| async move {
            self.run_spec(agents, &spec.agent, &spec.task, cwd, cancel).await
        })
        .await;

        outcomes
            .into_iter()
            .zip(names)
            .map(|(outcome, agent)| {
                outcome.unwrap_or_else(|e| {
                    SubagentResult::not_run(&agent, format!("Subagent failed: {e}"))
                })
            })
            .collect()
    }

    async fn run_chain(
        &self,
        agents: &BTreeMap<String, AgentConfig>,
        steps: &[TaskSpec],
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Vec<SubagentResult> {
        let placeholder = self.settings.chain_placeholder.as_str();
        let mut previous = String::new();
        let mut results = Vec::with_capacity(steps.len());
        for (k, step) in steps.iter().enumerate() {
            // An empty pattern would match between every character.
            let task = if placeholder.is_empty() {
                step.task.clone()
            } else {
                step.task.replace(placeholder, &previous)
            };
            let result = self.run_spec(agents, &step.agent, &task, cwd, cancel).await;
            let failed = result.is_error;
            previous.clone_from(&result.output);
            results.push(result);
            if failed {
                warn!(step = k + 1, agent = %step.agent, "chain halted");
                break;
            }
        }
        results
    }
}

impl std::fmt::Debug for SubagentDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentDispatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn rejected(error: &DispatchValidationError, agents: &BTreeMap<String, AgentConfig>) -> ToolOutput {
    debug!(error = %error, "dispatch request rejected");
    let names: Vec<&str> = agents.keys().map(String::as_str).collect();
    ToolOutput::error(report::validation_report(error, agents)).with_details(json!({
        "mode": Value::Null,
        "error": error.to_string(),
        "availableAgents": names,
    }))
}

/// `override_dir` relative to `cwd`, or `cwd` itself.
fn resolve_cwd(cwd: &Path, override_dir: Option<&str>) -> PathBuf {
    match override_dir.map(str::trim).filter(|d| !d.is_empty()) {
        Some(dir) => cwd.join(dir),
        None => cwd.to_path_buf(),
    }
}

#[async_trait]
impl CustomTool for SubagentDispatcher {
    fn name(&self) -> &str {
        SUBAGENT_TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        let task_list = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "agent": {"type": "string", "description": "Agent name"},
                    "task": {"type": "string", "description": "Task for the agent"}
                },
                "required": ["agent", "task"]
            }
        });
        ToolDefinition {
            name: SUBAGENT_TOOL_NAME.into(),
            description: format!(
                "Delegate work to specialised agents. Use exactly one mode:\n\n\
- **single**: `agent` + `task` runs one agent and returns its answer\n\
- **parallel**: `tasks` (up to {max}) runs independent tasks, {cap} at a time\n\
- **chain**: `chain` runs steps in order; `{placeholder}` in a step's task is replaced \
with the previous step's output, and the chain stops at the first failure\n\n\
`agentScope` picks user, project, or both agent directories.",
                max = self.settings.max_parallel_tasks,
                cap = self.settings.parallel_concurrency,
                placeholder = self.settings.chain_placeholder,
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent": {"type": "string", "description": "Agent name (single mode)"},
                    "task": {"type": "string", "description": "Task (single mode)"},
                    "tasks": task_list,
                    "chain": task_list,
                    "agentScope": {"type": "string", "enum": ["user", "project", "both"]},
                    "cwd": {"type": "string", "description": "Working directory for the agents"}
                }
            }),
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, RuntimeError> {
        Ok(self.dispatch(params, &ctx.working_directory, &ctx.cancellation).await)
    }
}

//! Dispatch parameters and their validation.
//!
//! Raw tool arguments deserialize into [`DispatchParams`], where every field
//! is optional. [`DispatchParams::into_request`] turns them into a
//! [`DispatchRequest`] with exactly one mode, or explains why it can't.

use std::collections::BTreeMap;

use margin_agents::{AgentConfig, AgentScope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `{agent, task}` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Agent name.
    pub agent: String,
    /// Task text. In chain mode this is a template.
    pub task: String,
}

impl TaskSpec {
    /// Build a pair.
    pub fn new(agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
        }
    }
}

/// Tool arguments as the model sent them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchParams {
    /// Single mode: agent name.
    #[serde(default)]
    pub agent: Option<String>,
    /// Single mode: task.
    #[serde(default)]
    pub task: Option<String>,
    /// Parallel mode.
    #[serde(default)]
    pub tasks: Option<Vec<TaskSpec>>,
    /// Chain mode.
    #[serde(default)]
    pub chain: Option<Vec<TaskSpec>>,
    /// Which agent directories to consult.
    #[serde(default)]
    pub agent_scope: Option<AgentScope>,
    /// Working directory override for subagents.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// A validated request. Exactly one mode by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchRequest {
    /// Run one agent.
    Single(TaskSpec),
    /// Run every task, bounded by the concurrency cap.
    Parallel(Vec<TaskSpec>),
    /// Run steps in order, feeding each output into the next.
    Chain(Vec<TaskSpec>),
}

impl DispatchRequest {
    /// `"single"`, `"parallel"`, or `"chain"`.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Single(_) => "single",
            Self::Parallel(_) => "parallel",
            Self::Chain(_) => "chain",
        }
    }

    /// Every task in request order.
    pub fn tasks(&self) -> &[TaskSpec] {
        match self {
            Self::Single(spec) => std::slice::from_ref(spec),
            Self::Parallel(specs) | Self::Chain(specs) => specs,
        }
    }

    /// Check every named agent exists in `agents`. Reports all unknown names
    /// at once, without duplicates.
    pub fn validate_agents(
        &self,
        agents: &BTreeMap<String, AgentConfig>,
    ) -> Result<(), DispatchValidationError> {
        let mut unknown: Vec<String> = Vec::new();
        for spec in self.tasks() {
            if !agents.contains_key(&spec.agent) && !unknown.contains(&spec.agent) {
                unknown.push(spec.agent.clone());
            }
        }
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(DispatchValidationError::UnknownAgents { names: unknown })
        }
    }
}

/// Why a dispatch request was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchValidationError {
    /// Arguments did not deserialize.
    #[error("Invalid parameters: {0}")]
    Malformed(String),

    /// No mode populated.
    #[error(
        "Provide exactly one mode: {{agent, task}} for a single task, {{tasks: [...]}} for parallel, or {{chain: [...]}} for a chain"
    )]
    NoMode,

    /// More than one mode populated.
    #[error("Provide exactly one mode, got {}", .modes.join(" and "))]
    MultipleModes {
        /// Populated modes.
        modes: Vec<&'static str>,
    },

    /// Single mode with only one of `agent`/`task`.
    #[error("Single mode needs both \"agent\" and \"task\"")]
    IncompleteSingle,

    /// Parallel or chain list with no entries.
    #[error("The {mode} list is empty")]
    Empty {
        /// `"tasks"` or `"chain"`.
        mode: &'static str,
    },

    /// Too many parallel tasks.
    #[error("Too many parallel tasks ({count}); the maximum is {max}")]
    TooManyTasks {
        /// Requested.
        count: usize,
        /// Allowed.
        max: usize,
    },

    /// Names not in the catalog.
    #[error("Unknown agents: {}", .names.join(", "))]
    UnknownAgents {
        /// Unknown names, in request order.
        names: Vec<String>,
    },
}

impl DispatchParams {
    /// Deserialize tool arguments.
    pub fn from_value(value: Value) -> Result<Self, DispatchValidationError> {
        serde_json::from_value(value).map_err(|e| DispatchValidationError::Malformed(e.to_string()))
    }

    /// Pick the one populated mode.
    ///
    /// Populated means present, even if empty: `{tasks: []}` selects parallel
    /// mode and then fails as empty.
    pub fn into_request(
        self,
        max_parallel_tasks: usize,
    ) -> Result<DispatchRequest, DispatchValidationError> {
        let single = self.agent.is_some() || self.task.is_some();
        let modes: Vec<&'static str> = [
            (single, "single"),
            (self.tasks.is_some(), "parallel"),
            (self.chain.is_some(), "chain"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();

        if modes.len() > 1 {
            return Err(DispatchValidationError::MultipleModes { modes });
        }

        match (self.agent, self.task, self.tasks, self.chain) {
            (Some(agent), Some(task), None, None) => {
                Ok(DispatchRequest::Single(TaskSpec { agent, task }))
            }
            (Some(_), None, None, None) | (None, Some(_), None, None) => {
                Err(DispatchValidationError::IncompleteSingle)
            }
            (None, None, Some(tasks), None) => {
                if tasks.is_empty() {
                    Err(DispatchValidationError::Empty { mode: "tasks" })
                } else if tasks.len() > max_parallel_tasks {
                    Err(DispatchValidationError::TooManyTasks {
                        count: tasks.len(),
                        max: max_parallel_tasks,
                    })
                } else {
                    Ok(DispatchRequest::Parallel(tasks))
                }
            }
            (None, None, None, Some(chain)) => {
                if chain.is_empty() {
                    Err(DispatchValidationError::Empty { mode: "chain" })
                } else {
                    Ok(DispatchRequest::Chain(chain))
                }
            }
            _ => Err(DispatchValidationError::NoMode),
        }
    }
}

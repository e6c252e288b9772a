//! Report formatting for dispatch results.

use std::collections::BTreeMap;

use margin_agents::AgentConfig;
use serde_json::{Value, json};

use crate::cancellation::TerminationReason;
use crate::dispatch::request::DispatchValidationError;
use crate::invocation::SubagentResult;

/// One `## <label> k [agent] — OK|ERROR` section. `index` is zero-based.
fn section(label: &str, index: usize, result: &SubagentResult) -> String {
    let status = if result.is_error { "ERROR" } else { "OK" };
    format!(
        "## {label} {} [{}] — {status}\n\n{}",
        index + 1,
        result.agent,
        result.output
    )
}

/// Parallel report: one section per task in request order. Errors if any
/// task errored.
pub fn parallel_report(results: &[SubagentResult]) -> (String, bool) {
    let content = results
        .iter()
        .enumerate()
        .map(|(i, r)| section("Task", i, r))
        .collect::<Vec<_>>()
        .join("\n\n");
    (content, results.iter().any(|r| r.is_error))
}

/// Chain report over the steps that ran. A failed last step gets the halt
/// notice.
pub fn chain_report(results: &[SubagentResult]) -> (String, bool) {
    let mut sections: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| section("Step", i, r))
        .collect();
    let failed = results.iter().position(|r| r.is_error);
    if let Some(k) = failed {
        sections.push(format!(
            "Chain halted at step {} [{}].",
            k + 1,
            results[k].agent
        ));
    }
    (sections.join("\n\n"), failed.is_some())
}

/// Validation failure text, always followed by the agents that exist.
pub fn validation_report(
    error: &DispatchValidationError,
    agents: &BTreeMap<String, AgentConfig>,
) -> String {
    let mut out = error.to_string();
    out.push_str("\n\n");
    out.push_str(&available_agents(agents));
    out
}

/// `Available agents:` listing.
pub fn available_agents(agents: &BTreeMap<String, AgentConfig>) -> String {
    if agents.is_empty() {
        return "Available agents: none".to_string();
    }
    let lines: Vec<String> = agents
        .values()
        .map(|a| format!("- {} ({}): {}", a.name, a.source, a.description))
        .collect();
    format!("Available agents:\n{}", lines.join("\n"))
}

/// Structured details for the host UI.
pub fn details(mode: &str, results: &[SubagentResult]) -> Value {
    let entries: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "agent": r.agent,
                "status": r.status(),
                "turns": r.turns,
                "durationMs": u64::try_from(r.duration.as_millis()).unwrap_or(u64::MAX),
                "hitTimeout": r.hit_timeout(),
                "hitTurnLimit": r.hit_turn_limit(),
                "termination": r.termination.as_ref().map(TerminationReason::label),
            })
        })
        .collect();
    json!({ "mode": mode, "results": entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(agent: &str, output: &str, is_error: bool) -> SubagentResult {
        SubagentResult {
            agent: agent.into(),
            output: output.into(),
            is_error,
            termination: None,
            turns: 1,
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn parallel_sections_in_order() {
        let (content, is_error) = parallel_report(&[
            result("explorer", "found A", false),
            result("explorer", "found B", false),
        ]);
        assert_eq!(
            content,
            "## Task 1 [explorer] — OK\n\nfound A\n\n## Task 2 [explorer] — OK\n\nfound B"
        );
        assert!(!is_error);
    }

    #[test]
    fn parallel_any_error_marks_report() {
        let (content, is_error) =
            parallel_report(&[result("a", "ok", false), result("b", "boom", true)]);
        assert!(content.contains("## Task 2 [b] — ERROR\n\nboom"));
        assert!(is_error);
    }

    #[test]
    fn chain_halt_notice() {
        let (content, is_error) = chain_report(&[
            result("drafter", "draft", false),
            result("reviewer", "Prompt failed: overloaded", true),
        ]);
        assert!(is_error);
        assert!(content.starts_with("## Step 1 [drafter] — OK\n\ndraft"));
        assert!(content.ends_with(
            "## Step 2 [reviewer] — ERROR\n\nPrompt failed: overloaded\n\nChain halted at step 2 [reviewer]."
        ));
    }

    #[test]
    fn chain_success_has_no_notice() {
        let (content, is_error) = chain_report(&[result("a", "1", false), result("b", "2", false)]);
        assert!(!is_error);
        assert!(!content.contains("halted"));
    }

    #[test]
    fn validation_lists_agents() {
        let mut agents = BTreeMap::new();
        let _ = agents.insert(
            "planner".to_string(),
            AgentConfig::new("planner", "Plans work"),
        );
        let text = validation_report(&DispatchValidationError::NoMode, &agents);
        assert!(text.starts_with("Provide exactly one mode"));
        assert!(text.ends_with("Available agents:\n- planner (user): Plans work"));

        let empty = validation_report(&DispatchValidationError::NoMode, &BTreeMap::new());
        assert!(empty.ends_with("Available agents: none"));
    }

    #[test]
    fn details_carry_status() {
        let mut timed_out = result("slow", "x", false);
        timed_out.termination = Some(TerminationReason::Timeout(Duration::from_secs(2)));
        let d = details("parallel", &[result("a", "ok", true), timed_out]);
        assert_eq!(d["mode"], "parallel");
        assert_eq!(d["results"][0]["status"], "error");
        assert_eq!(d["results"][1]["hitTimeout"], true);
        assert_eq!(d["results"][1]["termination"], "timeout");
        assert_eq!(d["results"][1]["durationMs"], 1500);
    }
}

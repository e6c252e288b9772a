//! Agent file parser.
//!
//! An agent file is markdown with an optional `---` delimited frontmatter
//! block. The frontmatter is a small YAML subset (scalars, inline arrays,
//! block lists); the body becomes the agent's system prompt.

use tracing::warn;

use crate::types::AgentFrontmatter;

/// Result of parsing an agent file.
#[derive(Debug, Clone)]
pub struct ParsedAgentMd {
    /// Parsed frontmatter (empty defaults if none present).
    pub frontmatter: AgentFrontmatter,
    /// Content after the frontmatter.
    pub body: String,
}

/// Parse an agent file's raw content into frontmatter and body.
pub fn parse_agent_md(raw_content: &str) -> ParsedAgentMd {
    let (yaml, body) = extract_frontmatter(raw_content);
    let frontmatter = yaml.map(|y| parse_frontmatter(&y)).unwrap_or_default();
    ParsedAgentMd {
        frontmatter,
        body: body.trim().to_string(),
    }
}

/// Split `---` delimited frontmatter from the body.
fn extract_frontmatter(content: &str) -> (Option<String>, String) {
    let trimmed = content.trim_start();
    let Some(after_first) = trimmed.strip_prefix("---") else {
        return (None, content.to_string());
    };
    let after_first = after_first
        .strip_prefix("\r\n")
        .or_else(|| after_first.strip_prefix('\n'))
        .unwrap_or(after_first);

    // Empty frontmatter block: closing delimiter on the very next line.
    if let Some(rest) = after_first.strip_prefix("---") {
        return (Some(String::new()), rest.trim_start_matches(['\r', '\n']).to_string());
    }

    match after_first.find("\n---") {
        Some(end_idx) => {
            let yaml = after_first[..end_idx].to_string();
            let rest = &after_first[end_idx + 4..];
            // Skip the remainder of the delimiter line.
            let body = rest.split_once('\n').map_or("", |(_, b)| b);
            (Some(yaml), body.to_string())
        }
        None => (None, content.to_string()),
    }
}

fn parse_frontmatter(yaml: &str) -> AgentFrontmatter {
    let mut fm = AgentFrontmatter::default();
    let lines: Vec<&str> = yaml.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "name" => fm.name = non_empty(unquote(value)),
            "description" => fm.description = non_empty(unquote(value)),
            "model" => fm.model = non_empty(unquote(value)),
            "tools" => {
                let tools = parse_list_value(value, &lines, &mut i);
                fm.tools = (!tools.is_empty()).then_some(tools);
            }
            "maxTurns" | "max_turns" => fm.max_turns = parse_number(key, value),
            "timeoutMs" | "timeout_ms" => fm.timeout_ms = parse_number(key, value),
            _ => {}
        }
    }

    fm
}

/// Parse a list value: inline `[a, b]`, comma list `a, b`, or block `- a`.
fn parse_list_value(value: &str, lines: &[&str], i: &mut usize) -> Vec<String> {
    if value.starts_with('[') {
        let inner = value.trim_start_matches('[').trim_end_matches(']');
        return split_comma_list(inner);
    }
    if !value.is_empty() {
        return split_comma_list(value);
    }

    let mut items = Vec::new();
    while *i < lines.len() {
        let Some(item) = lines[*i].trim().strip_prefix('-') else {
            break;
        };
        if let Some(item) = non_empty(unquote(item)) {
            items.push(item);
        }
        *i += 1;
    }
    items
}

fn split_comma_list(s: &str) -> Vec<String> {
    s.split(',').filter_map(|t| non_empty(unquote(t))).collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let cleaned = unquote(value);
    let parsed = cleaned.parse().ok();
    if parsed.is_none() {
        warn!(key, value = %cleaned, "ignoring non-numeric agent frontmatter value");
    }
    parsed
}

fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

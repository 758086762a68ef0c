//! Prompt fragment assembly (SS4.E step 5), grounded on `aigent-runtime`'s
//! `prompt_builder.rs` (centralized prompt assembly kept separate from
//! turn orchestration) but reduced to the fragments this design actually
//! names: tools summary, project summary, long-term digest, custom rules,
//! and a detected-intent header.

use core_tools::ToolSpec;

/// Everything the turn engine has on hand when it needs to (re-)send the
/// full system prompt (SS4.A `needs_context_refresh`).
pub struct PromptFragments<'a> {
    pub agent_name: &'a str,
    pub rules: &'a str,
    pub project_summary: &'a str,
    pub long_term_digest: &'a str,
    pub tool_specs: &'a [ToolSpec],
    pub user_message: &'a str,
}

/// Assembles the system prompt text from the fragments above. Deterministic
/// string formatting only — no LLM round-trip, matching `aigent-runtime`'s
/// own `build_chat_prompt` being a purely synchronous function once its
/// inputs are gathered.
pub fn build_system_prompt(fragments: &PromptFragments<'_>) -> String {
    let mut sections = Vec::new();

    sections.push(format!("You are {}, an autonomous coding assistant.", fragments.agent_name));

    if !fragments.rules.trim().is_empty() {
        sections.push(format!("## Rules\n{}", fragments.rules.trim()));
    }

    if !fragments.project_summary.trim().is_empty() {
        sections.push(format!("## Project\n{}", fragments.project_summary.trim()));
    }

    if !fragments.tool_specs.is_empty() {
        let tool_lines: Vec<String> = fragments
            .tool_specs
            .iter()
            .map(|spec| format!("- {}: {}", spec.name, spec.description))
            .collect();
        sections.push(format!("## Tools available\n{}", tool_lines.join("\n")));
    }

    if !fragments.long_term_digest.trim().is_empty() {
        sections.push(format!("## Long-term memory\n{}", fragments.long_term_digest.trim()));
    }

    if let Some(header) = detect_intent_header(fragments.user_message) {
        sections.push(header);
    }

    sections.join("\n\n")
}

/// A lightweight heuristic header flagging the kind of request the user just
/// made, so the model has an up-front steer without a separate
/// classification round-trip — grounded on `aigent-runtime`'s own habit of
/// prefixing healthcheck/diagnostic prompts with a bracketed tag (see
/// `AgentRuntime::test_model_connection`'s `[healthcheck][bot-name:...]`
/// prefix).
fn detect_intent_header(user_message: &str) -> Option<String> {
    let lower = user_message.to_lowercase();
    let intent = if lower.contains("fix") || lower.contains("bug") || lower.contains("error") {
        "debugging"
    } else if lower.contains("test") {
        "testing"
    } else if lower.contains("refactor") {
        "refactoring"
    } else if lower.contains("implement") || lower.contains("add ") || lower.contains("build") {
        "implementation"
    } else {
        return None;
    };

    Some(format!("## Detected intent\n{intent}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_fragments_still_produce_a_system_prompt() {
        let fragments = PromptFragments {
            agent_name: "Aigent",
            rules: "",
            project_summary: "",
            long_term_digest: "",
            tool_specs: &[],
            user_message: "hello",
        };
        let prompt = build_system_prompt(&fragments);
        assert!(prompt.contains("Aigent"));
    }

    #[test]
    fn tool_specs_are_listed_by_name() {
        let specs = vec![ToolSpec::new("read_file", "reads a file", false)];
        let fragments = PromptFragments {
            agent_name: "Aigent",
            rules: "",
            project_summary: "",
            long_term_digest: "",
            tool_specs: &specs,
            user_message: "hello",
        };
        let prompt = build_system_prompt(&fragments);
        assert!(prompt.contains("read_file"));
    }

    #[test]
    fn detects_debugging_intent() {
        assert_eq!(detect_intent_header("please fix this bug"), Some("## Detected intent\ndebugging".to_string()));
    }

    #[test]
    fn detects_no_intent_for_neutral_message() {
        assert_eq!(detect_intent_header("hello there"), None);
    }
}

use serde::{Deserialize, Serialize};

/// Structured fields an LLM may embed in a fenced ```json code block inside
/// its reply, used by the pipeline critic (SS4.G) for its
/// `{approved, feedback, response}` object and by insight extraction (SS4.E
/// step 15) for its `Decision:`/`Pattern:` one-liners.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StructuredOutput {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub reply: Option<String>,
}

/// Extracts the first valid JSON object from an LLM response, preferring a
/// fenced ` ```json ` block over a bare `{...}` span so that prose mentioning
/// braces doesn't get mistaken for the payload.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                let json_str = json_body[..fence_end].trim();
                if let Ok(val) = serde_json::from_str(json_str) {
                    return Some(val);
                }
            }
        }
    }

    let trimmed = response.trim();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                let candidate = &trimmed[start..=end];
                if let Ok(val) = serde_json::from_str(candidate) {
                    return Some(val);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_fenced_json() {
        let raw = "Sure!\n```json\n{\"action\":\"record_belief\",\"reply\":\"Got it\"}\n```";
        let out = extract_json_output::<StructuredOutput>(raw).unwrap();
        assert_eq!(out.action.as_deref(), Some("record_belief"));
        assert_eq!(out.reply.as_deref(), Some("Got it"));
    }

    #[test]
    fn extract_bare_json() {
        let raw = r#"{"action":"hello","reply":"world"}"#;
        let out = extract_json_output::<StructuredOutput>(raw).unwrap();
        assert_eq!(out.action.as_deref(), Some("hello"));
    }

    #[test]
    fn extract_fenced_takes_precedence_over_bare() {
        let raw = "Bare: {\"action\":\"wrong\"}\n```json\n{\"action\":\"right\"}\n```\n";
        let out = extract_json_output::<StructuredOutput>(raw).unwrap();
        assert_eq!(out.action.as_deref(), Some("right"));
    }

    #[test]
    fn extract_returns_none_for_plain_text() {
        assert!(extract_json_output::<StructuredOutput>("just some text").is_none());
    }

    #[test]
    fn extract_returns_none_for_malformed_fence() {
        let raw = "```json\n{not valid json}\n```";
        assert!(extract_json_output::<StructuredOutput>(raw).is_none());
    }

    #[derive(Debug, Deserialize)]
    struct CriticVerdict {
        approved: bool,
        #[serde(default)]
        feedback: Option<String>,
        #[serde(default)]
        response: Option<String>,
    }

    #[test]
    fn extract_critic_verdict_shape() {
        let raw = "```json\n{\"approved\": false, \"feedback\": \"missing X\"}\n```";
        let out = extract_json_output::<CriticVerdict>(raw).unwrap();
        assert!(!out.approved);
        assert_eq!(out.feedback.as_deref(), Some("missing X"));
        assert!(out.response.is_none());
    }
}

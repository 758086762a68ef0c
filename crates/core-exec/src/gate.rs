use std::sync::Arc;
use std::time::Duration;

use core_config::ApprovalMode;

use crate::approval::{ApprovalBridge, ApprovalOutcome, ApprovalRequest};

/// Governs whether a given tool call needs interactive approval, and carries
/// it out when it does. One `ApprovalGate` is shared (via `Arc`) across a
/// clone family (SS4.F), so sibling agents never spin up their own reviewer
/// channel.
pub struct ApprovalGate {
    mode: ApprovalMode,
    exempt_tools: Vec<String>,
    timeout: Duration,
    bridge: Option<Arc<dyn ApprovalBridge>>,
}

impl ApprovalGate {
    pub fn new(mode: ApprovalMode, exempt_tools: Vec<String>, timeout: Duration) -> Self {
        Self { mode, exempt_tools, timeout, bridge: None }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn ApprovalBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// `sensitive` comes from the tool's own `ToolSpec::sensitive` flag.
    pub fn requires_approval(&self, tool_name: &str, sensitive: bool) -> bool {
        if self.exempt_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        match self.mode {
            ApprovalMode::Autonomous => false,
            ApprovalMode::Balanced => sensitive,
            ApprovalMode::Safer => true,
        }
    }

    pub async fn request(&self, tool_name: &str, args_preview: String) -> ApprovalOutcome {
        let Some(bridge) = &self.bridge else {
            return ApprovalOutcome::Denied;
        };
        let request = ApprovalRequest { tool_name: tool_name.to_string(), args_preview };
        bridge.request(request, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeApprovalBridge;

    #[test]
    fn autonomous_never_requires_approval() {
        let gate = ApprovalGate::new(ApprovalMode::Autonomous, vec![], Duration::from_secs(1));
        assert!(!gate.requires_approval("run_shell", true));
        assert!(!gate.requires_approval("read_file", false));
    }

    #[test]
    fn balanced_only_gates_sensitive_tools() {
        let gate = ApprovalGate::new(ApprovalMode::Balanced, vec![], Duration::from_secs(1));
        assert!(gate.requires_approval("write_file", true));
        assert!(!gate.requires_approval("read_file", false));
    }

    #[test]
    fn safer_gates_everything_unless_exempt() {
        let gate = ApprovalGate::new(
            ApprovalMode::Safer,
            vec!["web_search".to_string()],
            Duration::from_secs(1),
        );
        assert!(gate.requires_approval("read_file", false));
        assert!(!gate.requires_approval("web_search", false));
    }

    #[tokio::test]
    async fn request_without_bridge_denies() {
        let gate = ApprovalGate::new(ApprovalMode::Safer, vec![], Duration::from_secs(1));
        let outcome = gate.request("run_shell", "command=ls".to_string()).await;
        assert_eq!(outcome, ApprovalOutcome::Denied);
    }

    #[tokio::test]
    async fn request_with_approving_bridge_approves() {
        let gate = ApprovalGate::new(ApprovalMode::Safer, vec![], Duration::from_secs(1))
            .with_bridge(Arc::new(FakeApprovalBridge::approving()));
        let outcome = gate.request("run_shell", "command=ls".to_string()).await;
        assert_eq!(outcome, ApprovalOutcome::Approved);
    }
}

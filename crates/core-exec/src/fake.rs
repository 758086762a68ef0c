use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::approval::{ApprovalBridge, ApprovalOutcome, ApprovalRequest};

/// A deterministic test double returning a single pre-configured outcome for
/// every request and recording what it was asked, so SS8's approval-gated
/// scenarios (deny-then-retry, timeout) run exactly without a live reviewer.
pub struct FakeApprovalBridge {
    outcome: ApprovalOutcome,
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl FakeApprovalBridge {
    pub fn always(outcome: ApprovalOutcome) -> Self {
        Self { outcome, requests: Mutex::new(Vec::new()) }
    }

    pub fn approving() -> Self {
        Self::always(ApprovalOutcome::Approved)
    }

    pub fn denying() -> Self {
        Self::always(ApprovalOutcome::Denied)
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn recorded_requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ApprovalBridge for FakeApprovalBridge {
    async fn request(&self, request: ApprovalRequest, _timeout: Duration) -> ApprovalOutcome {
        self.requests.lock().await.push(request);
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_every_request_and_returns_scripted_outcome() {
        let bridge = FakeApprovalBridge::denying();
        let outcome = bridge
            .request(
                ApprovalRequest { tool_name: "run_shell".into(), args_preview: "command=ls".into() },
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied);
        assert_eq!(bridge.request_count().await, 1);
        assert_eq!(bridge.recorded_requests().await[0].tool_name, "run_shell");
    }
}

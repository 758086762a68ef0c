use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// What the executor asks an external reviewer to weigh in on before a
/// sensitive tool call runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub args_preview: String,
}

/// The reviewer's decision. `TimedOut` is distinct from `Denied`: the caller
/// may want to log the two differently, even though both currently deny
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
}

/// The decision an external reviewer sends back over the reply channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// A reviewer capability the executor consumes: one production implementation
/// (`ChannelApprovalBridge`, backed by an mpsc/oneshot handshake with whatever
/// surface — CLI prompt, chat bot — is on the other end) and one deterministic
/// test double (`FakeApprovalBridge`).
#[async_trait]
pub trait ApprovalBridge: Send + Sync {
    async fn request(&self, request: ApprovalRequest, timeout: Duration) -> ApprovalOutcome;
}

pub type ApprovalSender = mpsc::Sender<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;
pub type ApprovalReceiver = mpsc::Receiver<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;

/// Creates a new approval channel pair; the receiving end is handed to
/// whatever surface presents requests to a human reviewer.
pub fn approval_channel() -> (ApprovalSender, ApprovalReceiver) {
    mpsc::channel(16)
}

/// Sends each request down an `mpsc` channel paired with a one-shot reply
/// slot. A late reply — one that arrives after the bounded wait below has
/// already given up — lands on a dropped receiver and is silently discarded
/// by the sender's `.send()` returning `Err`; no extra bookkeeping needed.
pub struct ChannelApprovalBridge {
    tx: ApprovalSender,
}

impl ChannelApprovalBridge {
    pub fn new(tx: ApprovalSender) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ApprovalBridge for ChannelApprovalBridge {
    async fn request(&self, request: ApprovalRequest, timeout: Duration) -> ApprovalOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((request, reply_tx)).await.is_err() {
            warn!("approval channel closed; denying by default");
            return ApprovalOutcome::Denied;
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(ApprovalDecision::Approve)) => ApprovalOutcome::Approved,
            Ok(Ok(ApprovalDecision::Deny)) => ApprovalOutcome::Denied,
            Ok(Err(_)) => {
                warn!("approval reply channel dropped without a decision; denying by default");
                ApprovalOutcome::Denied
            }
            Err(_) => ApprovalOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approve_round_trips() {
        let (tx, mut rx) = approval_channel();
        let bridge = ChannelApprovalBridge::new(tx);

        let responder = tokio::spawn(async move {
            let (_req, reply) = rx.recv().await.unwrap();
            reply.send(ApprovalDecision::Approve).unwrap();
        });

        let outcome = bridge
            .request(
                ApprovalRequest { tool_name: "write_file".into(), args_preview: "path=a.txt".into() },
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::Approved);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn deny_round_trips() {
        let (tx, mut rx) = approval_channel();
        let bridge = ChannelApprovalBridge::new(tx);

        tokio::spawn(async move {
            let (_req, reply) = rx.recv().await.unwrap();
            reply.send(ApprovalDecision::Deny).unwrap();
        });

        let outcome = bridge
            .request(
                ApprovalRequest { tool_name: "run_shell".into(), args_preview: "command=rm".into() },
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied);
    }

    #[tokio::test]
    async fn no_reply_times_out() {
        let (tx, rx) = approval_channel();
        let bridge = ChannelApprovalBridge::new(tx);
        // Hold the receiver open without ever replying.
        let _rx = rx;

        let outcome = bridge
            .request(
                ApprovalRequest { tool_name: "run_shell".into(), args_preview: "command=sleep".into() },
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::TimedOut);
    }

    #[tokio::test]
    async fn closed_channel_denies() {
        let (tx, rx) = approval_channel();
        drop(rx);
        let bridge = ChannelApprovalBridge::new(tx);

        let outcome = bridge
            .request(
                ApprovalRequest { tool_name: "write_file".into(), args_preview: "path=a.txt".into() },
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied);
    }
}

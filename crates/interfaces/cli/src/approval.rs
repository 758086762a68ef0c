//! An interactive `ApprovalBridge` (SS4.D) that prints the pending tool call
//! to stdout and reads a y/n answer from stdin, bounded by the gate's own
//! timeout. Grounded on `aigent-runtime`'s CLI-prompt-driven confirmation
//! style in `interfaces/cli/src/interactive.rs`, adapted to the core's
//! narrower `ApprovalBridge` capability instead of a direct TUI keypress
//! handler.

use std::time::Duration;

use async_trait::async_trait;
use core_exec::{ApprovalBridge, ApprovalOutcome, ApprovalRequest};

pub struct StdinApprovalBridge;

#[async_trait]
impl ApprovalBridge for StdinApprovalBridge {
    async fn request(&self, request: ApprovalRequest, timeout: Duration) -> ApprovalOutcome {
        println!(
            "\n[approval required] tool `{}`\n  args: {}\n  approve? [y/N]: ",
            request.tool_name, request.args_preview
        );

        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok();
            line
        });

        match tokio::time::timeout(timeout, read).await {
            Ok(Ok(line)) => {
                let answer = line.trim().to_ascii_lowercase();
                if answer == "y" || answer == "yes" {
                    ApprovalOutcome::Approved
                } else {
                    ApprovalOutcome::Denied
                }
            }
            Ok(Err(_)) => ApprovalOutcome::Denied,
            Err(_) => {
                println!("(approval timed out, denying)");
                ApprovalOutcome::TimedOut
            }
        }
    }
}

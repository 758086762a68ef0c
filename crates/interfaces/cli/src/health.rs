//! A concrete `HealthChecker` (SS6) for the CLI surface: shells out to
//! `cargo build`, `cargo test`, and `git status` in the configured
//! workspace. `core-kb::HealthChecker` documents this wiring as explicitly
//! out of scope for the core itself; the CLI is the natural place to
//! provide one concrete implementation so the heartbeat loop (SS4.F) is
//! runnable end to end.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use core_kb::{HealthChecker, HealthReport, Status};
use tokio::process::Command;

pub struct ShellHealthChecker {
    workspace: PathBuf,
}

impl ShellHealthChecker {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }

    async fn run_ok(&self, program: &str, args: &[&str]) -> Option<bool> {
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.workspace)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .ok()?;
        Some(output.success())
    }
}

#[async_trait]
impl HealthChecker for ShellHealthChecker {
    async fn check(&self) -> HealthReport {
        let build_status = match self.run_ok("cargo", &["build", "--quiet"]).await {
            Some(true) => Status::Ok,
            Some(false) => Status::Failing,
            None => Status::Unknown,
        };
        let test_status = match self.run_ok("cargo", &["test", "--quiet"]).await {
            Some(true) => Status::Ok,
            Some(false) => Status::Failing,
            None => Status::Unknown,
        };

        let uncommitted = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&self.workspace)
            .output()
            .await
            .map(|out| !out.stdout.is_empty())
            .unwrap_or(false);
        let git_status = match self.run_ok("git", &["rev-parse", "--is-inside-work-tree"]).await {
            Some(true) => Status::Ok,
            Some(false) => Status::Failing,
            None => Status::Unknown,
        };

        let mut recommendations = Vec::new();
        if build_status.is_failing() {
            recommendations.push("fix the build before continuing".to_string());
        }
        if test_status.is_failing() {
            recommendations.push("investigate the failing test suite".to_string());
        }

        HealthReport {
            build_status,
            test_status,
            git_status,
            git_uncommitted: uncommitted,
            pending_tasks: 0,
            warnings: vec![],
            recommendations,
        }
    }
}

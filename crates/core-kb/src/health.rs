//! The health-checker capability the heartbeat loop consumes (SS4.F step 1,
//! SS6 "Health checker (consumed)"). Concrete probes (actually running a
//! build, a test suite, `git status`) are out of scope for the core; this
//! module only defines the capability and a deterministic test double.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failing,
    Unknown,
}

impl Status {
    pub fn is_failing(self) -> bool {
        matches!(self, Status::Failing)
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub build_status: Status,
    pub test_status: Status,
    pub git_status: Status,
    pub git_uncommitted: bool,
    pub pending_tasks: usize,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    pub fn build_failing(&self) -> bool {
        self.build_status.is_failing()
    }

    pub fn tests_failing(&self) -> bool {
        self.test_status.is_failing()
    }

    /// A short human-readable digest, used by the heartbeat to compose its
    /// wake-up prompt (SS4.F step 4).
    pub fn summary(&self) -> String {
        format!(
            "build={:?} tests={:?} git={:?} uncommitted={} pending_tasks={}",
            self.build_status, self.test_status, self.git_status, self.git_uncommitted, self.pending_tasks
        )
    }
}

/// The health check capability the core consumes (SS6). One concrete
/// implementation would shell out to `cargo build`/`cargo test`/`git
/// status`; that wiring is out of scope here.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self) -> HealthReport;
}

/// A deterministic test double returning a fixed, pre-configured report on
/// every call.
pub struct FakeHealthChecker {
    report: HealthReport,
}

impl FakeHealthChecker {
    pub fn new(report: HealthReport) -> Self {
        Self { report }
    }

    pub fn healthy() -> Self {
        Self::new(HealthReport {
            build_status: Status::Ok,
            test_status: Status::Ok,
            git_status: Status::Ok,
            git_uncommitted: false,
            pending_tasks: 0,
            warnings: vec![],
            recommendations: vec![],
        })
    }

    pub fn build_failing() -> Self {
        let mut report = Self::healthy().report;
        report.build_status = Status::Failing;
        report.recommendations.push("fix the build before continuing".to_string());
        Self::new(report)
    }
}

#[async_trait]
impl HealthChecker for FakeHealthChecker {
    async fn check(&self) -> HealthReport {
        self.report.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthy_report_has_no_failures() {
        let checker = FakeHealthChecker::healthy();
        let report = checker.check().await;
        assert!(!report.build_failing());
        assert!(!report.tests_failing());
    }

    #[tokio::test]
    async fn build_failing_report_is_detected() {
        let checker = FakeHealthChecker::build_failing();
        let report = checker.check().await;
        assert!(report.build_failing());
        assert!(!report.recommendations.is_empty());
    }
}

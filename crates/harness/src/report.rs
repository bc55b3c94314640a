use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::CaseError;
use crate::metrics::TestDetails;

/// Final status of one case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Skipped,
    Failed,
    /// Fatal error (process failure, I/O); not an assertion
    Error,
}

/// Result of one case in the suite report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub status: CaseStatus,
    pub reason: Option<String>,
    pub duration_secs: f64,
    pub details: TestDetails,
}

impl CaseReport {
    pub fn from_result(name: &str, result: Result<(), CaseError>, duration_secs: f64, details: TestDetails) -> Self {
        let (status, reason) = match result {
            Ok(()) => (CaseStatus::Passed, None),
            Err(CaseError::Skipped(reason)) => (CaseStatus::Skipped, Some(reason)),
            Err(CaseError::Failed(reason)) => (CaseStatus::Failed, Some(reason)),
            Err(CaseError::Fatal(e)) => (CaseStatus::Error, Some(format!("{:#}", e))),
        };
        CaseReport { name: name.to_string(), status, reason, duration_secs, details }
    }
}

/// Everything one harness run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub id: Uuid,
    pub platform: String,
    pub driver: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new(platform: &str, driver: &str) -> Self {
        SuiteReport {
            id: Uuid::new_v4(),
            platform: platform.to_string(),
            driver: driver.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            cases: Vec::new(),
        }
    }

    pub fn count(&self, status: CaseStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    /// True when nothing failed or errored; skips do not count against a run
    pub fn is_success(&self) -> bool {
        self.count(CaseStatus::Failed) == 0 && self.count(CaseStatus::Error) == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} skipped, {} failed, {} errors",
            self.count(CaseStatus::Passed),
            self.count(CaseStatus::Skipped),
            self.count(CaseStatus::Failed),
            self.count(CaseStatus::Error)
        )
    }

    /// Write the report as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize suite report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write suite report: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_and_summary() {
        let mut report = SuiteReport::new("TGL", "iHD");
        report.cases.push(CaseReport::from_result("a", Ok(()), 1.0, TestDetails::new()));
        report.cases.push(CaseReport::from_result("b", Err(CaseError::skip("NV21 format not supported")), 0.0, TestDetails::new()));
        assert!(report.is_success());

        report.cases.push(CaseReport::from_result("c", Err(anyhow::anyhow!("spawn failed").into()), 0.1, TestDetails::new()));
        assert!(!report.is_success());
        assert_eq!(report.cases[2].status, CaseStatus::Error);
        assert_eq!(report.cases[2].reason.as_deref(), Some("spawn failed"));
        assert_eq!(report.summary(), "1 passed, 1 skipped, 0 failed, 1 errors");
    }

    #[test]
    fn test_save_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");

        let mut report = SuiteReport::new("DG2", "iHD");
        let mut details = TestDetails::new();
        details.insert("md5_ref".to_string(), "abcd".to_string());
        report.cases.push(CaseReport::from_result("r2r", Err(CaseError::fail("r2r md5 mismatch")), 2.5, details));
        report.save(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["platform"], "DG2");
        assert_eq!(value["cases"][0]["status"], "failed");
        assert_eq!(value["cases"][0]["reason"], "r2r md5 mismatch");
        assert_eq!(value["cases"][0]["details"]["md5_ref"], "abcd");
    }
}

use serde::{Deserialize, Serialize};

/// Outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
}

/// Per-case record handed to report writers and the reporting service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReport {
    pub name: String,
    pub status: CaseStatus,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub screenshot_path: Option<String>,
}

/// Aggregated counters for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSummary {
    pub run_id: String,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total_duration_ms: Option<u64>,
}

impl SuiteSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Full results of a run, for report generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResults {
    pub run_id: String,
    pub cases: Vec<CaseReport>,
    pub summary: SuiteSummary,
    pub generated_at: String,
}

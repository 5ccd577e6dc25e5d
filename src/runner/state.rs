use std::time::Instant;

use crate::report::types::{CaseReport, CaseStatus, SuiteResults, SuiteSummary};

/// Mutable state for one case while it runs.
#[derive(Debug, Clone)]
pub struct CaseState {
    pub name: String,
    pub status: CaseStatus,
    pub started_at: Option<Instant>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub screenshot_path: Option<String>,
}

impl CaseState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CaseStatus::Skipped,
            started_at: None,
            duration_ms: None,
            error: None,
            screenshot_path: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    fn stop_clock(&mut self) {
        if let Some(start) = self.started_at {
            self.duration_ms = Some(start.elapsed().as_millis() as u64);
        }
    }

    pub fn pass(&mut self) {
        self.stop_clock();
        self.status = CaseStatus::Passed;
    }

    pub fn fail(&mut self, error: String) {
        self.stop_clock();
        self.status = CaseStatus::Failed;
        self.error = Some(error);
    }

    pub fn skip(&mut self, reason: String) {
        self.status = CaseStatus::Skipped;
        self.error = Some(reason);
    }

    /// Serialize state for reporting
    pub fn to_report(&self) -> CaseReport {
        CaseReport {
            name: self.name.clone(),
            status: self.status,
            duration_ms: self.duration_ms,
            error: self.error.clone(),
            screenshot_path: self.screenshot_path.clone(),
        }
    }
}

/// Global state for a suite run.
#[derive(Debug, Clone)]
pub struct SuiteState {
    pub run_id: String,
    pub cases: Vec<CaseState>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl SuiteState {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            cases: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn add_case(&mut self, case: CaseState) {
        self.cases.push(case);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Instant::now());
    }

    pub fn summary(&self) -> SuiteSummary {
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for case in &self.cases {
            match case.status {
                CaseStatus::Passed => passed += 1,
                CaseStatus::Failed => failed += 1,
                CaseStatus::Skipped => skipped += 1,
            }
        }

        let total_duration_ms = self.started_at.map(|start| {
            self.finished_at
                .unwrap_or_else(Instant::now)
                .duration_since(start)
                .as_millis() as u64
        });

        SuiteSummary {
            run_id: self.run_id.clone(),
            total: self.cases.len() as u32,
            passed,
            failed,
            skipped,
            total_duration_ms,
        }
    }

    /// Serialize state for reporting
    pub fn to_report(&self) -> SuiteResults {
        SuiteResults {
            run_id: self.run_id.clone(),
            cases: self.cases.iter().map(|c| c.to_report()).collect(),
            summary: self.summary(),
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut suite = SuiteState::new("run-1");
        suite.start();

        let mut a = CaseState::new("search_smoke");
        a.start();
        a.pass();
        suite.add_case(a);

        let mut b = CaseState::new("heading_extraction");
        b.start();
        b.fail("assertion failed".to_string());
        suite.add_case(b);

        let mut c = CaseState::new("later_case");
        c.skip("aborted after failure".to_string());
        suite.add_case(c);

        suite.finish();
        let summary = suite.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.all_passed());
        assert!(summary.total_duration_ms.is_some());
    }

    #[test]
    fn test_failed_case_keeps_error_and_screenshot() {
        let mut case = CaseState::new("search_smoke");
        case.start();
        case.screenshot_path = Some("output/fail_search_smoke.png".to_string());
        case.fail("check did not hold".to_string());

        let report = case.to_report();
        assert_eq!(report.status, CaseStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("check did not hold"));
        assert_eq!(
            report.screenshot_path.as_deref(),
            Some("output/fail_search_smoke.png")
        );
        assert!(report.duration_ms.is_some());
    }
}

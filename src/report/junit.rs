use super::types::{CaseReport, CaseStatus, SuiteResults};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

/// Generate JUnit XML report string from suite results
pub fn generate_junit_xml(results: &SuiteResults) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let total_tests = results.cases.len();
    let failures = results
        .cases
        .iter()
        .filter(|c| c.status == CaseStatus::Failed)
        .count();
    let skipped = results
        .cases
        .iter()
        .filter(|c| c.status == CaseStatus::Skipped)
        .count();
    let total_duration: u64 = results.cases.iter().map(|c| c.duration_ms.unwrap_or(0)).sum();

    // <testsuites>
    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "sage-tester-run"));
    suites_start.push_attribute(("tests", total_tests.to_string().as_str()));
    suites_start.push_attribute(("failures", failures.to_string().as_str()));
    suites_start.push_attribute(("skipped", skipped.to_string().as_str()));
    suites_start.push_attribute((
        "time",
        (total_duration as f64 / 1000.0).to_string().as_str(),
    ));
    writer.write_event(Event::Start(suites_start))?;

    // Single <testsuite> for this run
    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", "default"));
    suite_start.push_attribute(("tests", total_tests.to_string().as_str()));
    suite_start.push_attribute(("failures", failures.to_string().as_str()));
    suite_start.push_attribute(("skipped", skipped.to_string().as_str()));
    suite_start.push_attribute(("id", results.run_id.as_str()));
    suite_start.push_attribute((
        "time",
        (total_duration as f64 / 1000.0).to_string().as_str(),
    ));
    suite_start.push_attribute(("timestamp", results.generated_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for case in &results.cases {
        write_test_case(&mut writer, case)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let result = writer.into_inner().into_inner();
    let xml = String::from_utf8(result)?;
    Ok(xml)
}

fn write_test_case<W: std::io::Write>(writer: &mut Writer<W>, case: &CaseReport) -> Result<()> {
    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", case.name.as_str()));
    case_start.push_attribute(("classname", "cases"));
    case_start.push_attribute((
        "time",
        (case.duration_ms.unwrap_or(0) as f64 / 1000.0)
            .to_string()
            .as_str(),
    ));

    writer.write_event(Event::Start(case_start))?;

    match case.status {
        CaseStatus::Failed => {
            let mut fail_start = BytesStart::new("failure");
            let message = case.error.as_deref().unwrap_or("Unknown error");
            fail_start.push_attribute(("message", message));
            fail_start.push_attribute(("type", "AssertionError"));
            writer.write_event(Event::Start(fail_start))?;

            if let Some(err) = &case.error {
                writer.write_event(Event::Text(BytesText::new(err)))?;
            }

            writer.write_event(Event::End(BytesEnd::new("failure")))?;
        }
        CaseStatus::Skipped => {
            writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
        }
        CaseStatus::Passed => {}
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Write report to file
pub fn write_report(results: &SuiteResults, output_dir: &Path) -> Result<()> {
    let xml = generate_junit_xml(results)?;
    let path = output_dir.join("junit.xml");
    std::fs::write(&path, xml)?;
    println!("    Generated JUnit report: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::SuiteSummary;

    #[test]
    fn test_generate_junit_xml() {
        let results = SuiteResults {
            run_id: "test-run".to_string(),
            cases: vec![
                CaseReport {
                    name: "search_smoke".to_string(),
                    status: CaseStatus::Passed,
                    duration_ms: Some(1500),
                    error: None,
                    screenshot_path: None,
                },
                CaseReport {
                    name: "heading_extraction".to_string(),
                    status: CaseStatus::Failed,
                    duration_ms: Some(2000),
                    error: Some("assertion failed: 'page title contains Mercury'".to_string()),
                    screenshot_path: Some("output/fail_heading_extraction.png".to_string()),
                },
            ],
            summary: SuiteSummary {
                run_id: "test-run".to_string(),
                total: 2,
                passed: 1,
                failed: 1,
                skipped: 0,
                total_duration_ms: Some(3500),
            },
            generated_at: "2026-01-01 12:00:00".to_string(),
        };

        let xml = generate_junit_xml(&results).expect("Failed to generate XML");

        assert!(xml.contains(r#"<testsuites name="sage-tester-run""#));
        assert!(xml.contains(r#"tests="2""#));
        assert!(xml.contains(r#"failures="1""#));
        assert!(xml.contains(r#"<testcase name="search_smoke""#));
        assert!(xml.contains("assertion failed"));
    }
}

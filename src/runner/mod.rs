//! Sequential case executor
//!
//! One browser session per case, exclusively owned and closed on both the
//! pass and fail arms. Credentials are resolved before any browser work so
//! a missing key never leaves an orphaned browser process. Failures trigger
//! a screenshot from the still-live session which is written to the output
//! directory and attached to ReportPortal, best effort.

pub mod state;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::{Agent, LlmBackend, RetryPolicy, StepBackend};
use crate::cases::{self, CaseContext, TestCase};
use crate::driver::traits::SessionDriver;
use crate::driver::web::WebSession;
use crate::report::portal::Portal;
use crate::report::types::{CaseStatus, SuiteSummary};
use crate::report::{json, junit};
use crate::utils::config::{Credentials, Settings};

pub use state::*;

pub struct RunOptions {
    pub output: PathBuf,
    pub case_filter: Option<String>,
    pub continue_on_failure: bool,
    pub write_reports: bool,
}

/// Run the selected cases sequentially and return the summary.
pub async fn run_suite(settings: &Settings, options: &RunOptions) -> Result<SuiteSummary> {
    // Credentials first: a missing key must fail before any browser action.
    let credentials = Credentials::resolve(settings.llm.provider)?;
    let backend: Arc<dyn StepBackend> =
        Arc::new(LlmBackend::new(settings, &credentials).context("failed to build LLM backend")?);
    let policy = RetryPolicy::from(settings);

    let all_cases = cases::builtin_cases();
    let selected = select_cases(&all_cases, options.case_filter.as_deref())?;

    std::fs::create_dir_all(&options.output).with_context(|| {
        format!("failed to create output directory {}", options.output.display())
    })?;

    let mut portal = Portal::from_env();
    let mut suite = SuiteState::new(&Uuid::new_v4().to_string());
    suite.start();
    portal.start_launch().await;

    println!(
        "{} running {} case(s) with provider '{}'",
        "▶".blue(),
        selected.len(),
        settings.llm.provider.as_str()
    );

    let mut abort = false;
    for case in selected {
        let mut case_state = CaseState::new(case.name);

        if abort {
            case_state.skip("aborted after earlier failure".to_string());
            println!("  {} {} (skipped)", "○".yellow(), case.name);
            suite.add_case(case_state);
            continue;
        }

        case_state.start();
        let item_uuid = portal.start_item(case.name).await;

        let spinner = case_spinner(case.name);

        // Browser provisioning failure is a fatal setup error: abort the run.
        let session = match WebSession::launch(settings).await {
            Ok(session) => session,
            Err(e) => {
                spinner.finish_and_clear();
                portal.finish_launch().await;
                return Err(e.context("browser session setup failed"));
            }
        };

        let outcome = {
            let agent = Agent::new(&session, backend.clone(), policy);
            let cx = CaseContext {
                session: &session,
                agent: &agent,
                settings,
            };
            (case.run)(&cx).await
        };

        spinner.finish_and_clear();

        match outcome {
            Ok(()) => {
                case_state.pass();
                println!(
                    "  {} {} ({})",
                    "✔".green(),
                    case.name,
                    format_duration(case_state.duration_ms)
                );
                if let Some(item) = &item_uuid {
                    portal.finish_item(item, CaseStatus::Passed).await;
                }
            }
            Err(error) => {
                let message = format!("{:#}", error);
                println!("  {} {}: {}", "✖".red(), case.name, message);

                // Screenshot from the still-live session, then attach.
                let screenshot =
                    capture_failure_screenshot(&session, case.name, &options.output).await;
                if let Some((path, bytes)) = screenshot {
                    case_state.screenshot_path = Some(path.clone());
                    if let Some(item) = &item_uuid {
                        let filename = PathBuf::from(&path)
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| "screenshot.png".to_string());
                        portal
                            .attach_failure(item, &message, Some((&filename, bytes)))
                            .await;
                    }
                } else if let Some(item) = &item_uuid {
                    portal.attach_failure(item, &message, None).await;
                }

                if let Some(item) = &item_uuid {
                    portal.finish_item(item, CaseStatus::Failed).await;
                }
                case_state.fail(message);

                if !options.continue_on_failure {
                    abort = true;
                }
            }
        }

        // Teardown on both arms. A teardown failure must not flip a verdict.
        if let Err(e) = session.close().await {
            log::warn!("session teardown failed: {:#}", e);
        }

        suite.add_case(case_state);
    }

    suite.finish();
    portal.finish_launch().await;

    let results = suite.to_report();
    if options.write_reports {
        let json_path = options.output.join("results.json");
        json::generate(&results, Some(&json_path))?;
        junit::write_report(&results, &options.output)?;
    }

    print_summary(&results.summary);
    Ok(results.summary)
}

fn select_cases<'c>(
    all: &'c [TestCase],
    filter: Option<&str>,
) -> Result<Vec<&'c TestCase>> {
    match filter {
        None => Ok(all.iter().collect()),
        Some(name) => {
            let matched: Vec<&TestCase> = all.iter().filter(|c| c.name == name).collect();
            if matched.is_empty() {
                anyhow::bail!(
                    "no test case named '{}' (available: {})",
                    name,
                    all.iter()
                        .map(|c| c.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            Ok(matched)
        }
    }
}

fn case_spinner(name: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("  {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(name.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Capture and persist a failure screenshot. Best effort, like the rest of
/// the failure path: a broken screenshot must not mask the real failure.
async fn capture_failure_screenshot(
    session: &dyn SessionDriver,
    case_name: &str,
    output_dir: &std::path::Path,
) -> Option<(String, Vec<u8>)> {
    let bytes = match session.screenshot_bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("failed to capture failure screenshot: {:#}", e);
            return None;
        }
    };

    let timestamp = chrono::Local::now().format("%H%M%S");
    let uuid = Uuid::new_v4().to_string();
    let filename = format!("fail_{}_{}_{}.png", case_name, timestamp, &uuid[..8]);
    let path = output_dir.join(&filename);

    match std::fs::write(&path, &bytes) {
        Ok(()) => {
            println!("    {} saved screenshot: {}", "▸".blue(), path.display());
            Some((path.to_string_lossy().to_string(), bytes))
        }
        Err(e) => {
            log::warn!("failed to write failure screenshot: {:#}", e);
            // bytes are still good for the portal attachment
            Some((filename, bytes))
        }
    }
}

fn format_duration(duration_ms: Option<u64>) -> String {
    match duration_ms {
        Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
        None => "-".to_string(),
    }
}

fn print_summary(summary: &SuiteSummary) {
    println!();
    let verdict = if summary.all_passed() {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!(
        "{} {} passed, {} failed, {} skipped ({})",
        verdict,
        summary.passed,
        summary.failed,
        summary.skipped,
        format_duration(summary.total_duration_ms)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::web::PageSnapshot;
    use async_trait::async_trait;

    struct StillSession {
        bytes: Option<Vec<u8>>,
    }

    #[async_trait]
    impl SessionDriver for StillSession {
        async fn goto(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn snapshot(&self) -> Result<PageSnapshot> {
            Ok(PageSnapshot {
                url: "https://example.com".into(),
                title: "Example Domain".into(),
                html: "<html></html>".into(),
            })
        }
        async fn click(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn fill(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn screenshot_bytes(&self) -> Result<Vec<u8>> {
            match &self.bytes {
                Some(bytes) => Ok(bytes.clone()),
                None => anyhow::bail!("page already gone"),
            }
        }
        async fn type_text(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn press_key(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_screenshot_lands_in_output_dir() {
        let session = StillSession {
            bytes: Some(vec![0x89, b'P', b'N', b'G']),
        };
        let dir = std::env::temp_dir().join(format!("sage-tester-shot-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let (path, bytes) = capture_failure_screenshot(&session, "search_smoke", &dir)
            .await
            .unwrap();

        let name = PathBuf::from(&path)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(name.starts_with("fail_search_smoke_"));
        assert!(name.ends_with(".png"));
        assert_eq!(std::fs::read(&path).unwrap(), bytes);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_still_yields_bytes_for_attachment() {
        let session = StillSession {
            bytes: Some(vec![1, 2, 3]),
        };
        // a plain file as the output dir makes every write under it fail
        let bogus_dir =
            std::env::temp_dir().join(format!("sage-tester-notadir-{}", Uuid::new_v4()));
        std::fs::write(&bogus_dir, b"").unwrap();

        let (name, bytes) = capture_failure_screenshot(&session, "search_smoke", &bogus_dir)
            .await
            .unwrap();
        assert!(name.starts_with("fail_search_smoke_"));
        assert_eq!(bytes, vec![1, 2, 3]);

        std::fs::remove_file(&bogus_dir).unwrap();
    }

    #[tokio::test]
    async fn test_screenshot_capture_failure_degrades_to_none() {
        let session = StillSession { bytes: None };
        let dir = std::env::temp_dir();
        assert!(capture_failure_screenshot(&session, "search_smoke", &dir)
            .await
            .is_none());
    }

    #[test]
    fn test_select_cases_by_name() {
        let all = cases::builtin_cases();
        assert_eq!(select_cases(&all, None).unwrap().len(), all.len());

        let one = select_cases(&all, Some("search_smoke")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "search_smoke");

        assert!(select_cases(&all, Some("nope")).is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(1500)), "1.5s");
        assert_eq!(format_duration(None), "-");
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_browser_setup() {
        std::env::remove_var("OPENAI_API_KEY");
        // default provider is openai, which requires a key
        let settings = Settings::default();
        let options = RunOptions {
            output: std::env::temp_dir().join("sage-tester-cred-test"),
            case_filter: None,
            continue_on_failure: false,
            write_reports: false,
        };

        let err = run_suite(&settings, &options).await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        // failed before the output directory was even created
        assert!(!options.output.exists());
    }
}

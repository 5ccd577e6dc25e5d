pub mod json;
pub mod junit;
pub mod portal;
pub mod types;

use anyhow::Result;
use std::path::Path;

/// Generate report from saved suite results
pub fn generate_report(results_path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let raw = std::fs::read_to_string(results_path)?;
    let results: types::SuiteResults = serde_json::from_str(&raw)?;

    match format {
        "json" => json::generate(&results, output),
        "junit" => {
            let xml = junit::generate_junit_xml(&results)?;
            if let Some(path) = output {
                std::fs::write(path, xml)?;
                println!("JUnit report saved to: {}", path.display());
            } else {
                println!("{}", xml);
            }
            Ok(())
        }
        _ => anyhow::bail!("Unknown format: {}", format),
    }
}

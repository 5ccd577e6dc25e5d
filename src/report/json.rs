use super::types::SuiteResults;
use anyhow::Result;
use std::path::Path;

/// Generate JSON report
pub fn generate(results: &SuiteResults, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;

    if let Some(path) = output {
        std::fs::write(path, json)?;
        println!("JSON report saved to: {}", path.display());
    } else {
        println!("{}", json);
    }

    Ok(())
}

//! Built-in example test cases
//!
//! Each case owns its session for its full duration and talks to the page
//! only through the session and the agent. Instructions are phrased
//! concretely; vague instructions make the backend guess.

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

use crate::agent::{Agent, ExtractedValue};
use crate::driver::traits::SessionDriver;
use crate::driver::web::WebSession;
use crate::utils::config::Settings;

/// Everything a case body may touch.
pub struct CaseContext<'a> {
    pub session: &'a WebSession,
    pub agent: &'a Agent<'a>,
    pub settings: &'a Settings,
}

pub type CaseFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a>>;
pub type CaseFn = for<'a> fn(&'a CaseContext<'a>) -> CaseFuture<'a>;

pub struct TestCase {
    pub name: &'static str,
    pub description: &'static str,
    pub run: CaseFn,
}

pub fn builtin_cases() -> Vec<TestCase> {
    vec![
        TestCase {
            name: "search_smoke",
            description: "search for a term and verify the results page mentions it",
            run: search_smoke,
        },
        TestCase {
            name: "heading_extraction",
            description: "extract the main heading of a page as text",
            run: heading_extraction,
        },
    ]
}

/// Navigate to the search engine, run a query through the agent and assert
/// on the resulting page.
fn search_smoke<'a>(cx: &'a CaseContext<'a>) -> CaseFuture<'a> {
    Box::pin(async move {
        let base = cx
            .settings
            .base_url
            .as_deref()
            .unwrap_or("https://duckduckgo.com");
        cx.session.goto(base).await?;

        cx.agent
            .perform("enter 'Mercury element' into the search input and submit")
            .await?;
        cx.agent
            .check("the page shows search results mentioning Mercury")
            .await?;
        Ok(())
    })
}

/// `get` returning a typed value for a known-stable page.
fn heading_extraction<'a>(cx: &'a CaseContext<'a>) -> CaseFuture<'a> {
    Box::pin(async move {
        cx.session.goto("https://example.com").await?;

        let value = cx.agent.get("the main heading text of the page").await?;
        match value {
            ExtractedValue::Text(text) if !text.trim().is_empty() => Ok(()),
            other => anyhow::bail!("expected non-empty heading text, got: {}", other),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_case_names_are_unique() {
        let cases = builtin_cases();
        let names: HashSet<&str> = cases.iter().map(|c| c.name).collect();
        assert_eq!(names.len(), cases.len());
        assert!(names.contains("search_smoke"));
    }
}

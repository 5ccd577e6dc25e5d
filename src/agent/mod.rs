//! AI test-step wrapper
//!
//! `Agent` turns natural-language instructions into browser actions through
//! a [`StepBackend`]. Every backend call runs under a retry policy: bounded
//! attempts, exponential backoff, and a total wall-clock budget. A usable
//! but negative `check` verdict is the test's failure and is never retried.

pub mod llm;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::driver::traits::SessionDriver;
use crate::driver::web::PageSnapshot;
use crate::utils::config::Settings;

pub use llm::LlmBackend;

/// One concrete browser action planned by the backend for a `do` step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannedAction {
    Goto { url: String },
    Click { selector: String },
    Fill { selector: String, text: String },
    Type { text: String },
    Press { key: String },
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedAction::Goto { url } => write!(f, "goto('{}')", url),
            PlannedAction::Click { selector } => write!(f, "click('{}')", selector),
            PlannedAction::Fill { selector, .. } => write!(f, "fill('{}')", selector),
            PlannedAction::Type { text } => write!(f, "type({} chars)", text.len()),
            PlannedAction::Press { key } => write!(f, "press('{}')", key),
        }
    }
}

/// Outcome of a `check` instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub holds: bool,
    #[serde(default)]
    pub reason: String,
}

/// Typed value produced by a `get` instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedValue {
    Text(String),
    Bool(bool),
    Number(f64),
}

impl std::fmt::Display for ExtractedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractedValue::Text(s) => write!(f, "{}", s),
            ExtractedValue::Bool(b) => write!(f, "{}", b),
            ExtractedValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Backend that interprets instructions against a page snapshot.
/// The production implementation is [`LlmBackend`].
#[async_trait]
pub trait StepBackend: Send + Sync {
    /// Plan the concrete actions for a `do` instruction
    async fn plan(&self, instruction: &str, page: &PageSnapshot) -> Result<Vec<PlannedAction>>;

    /// Evaluate a `check` instruction against the page
    async fn verify(&self, instruction: &str, page: &PageSnapshot) -> Result<Verdict>;

    /// Extract a value described by a `get` instruction
    async fn extract(&self, instruction: &str, page: &PageSnapshot) -> Result<ExtractedValue>;
}

/// Retry behavior around backend calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub total_timeout: Duration,
}

impl From<&Settings> for RetryPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            backoff: Duration::from_secs_f64(settings.retry_backoff_secs),
            total_timeout: Duration::from_secs_f64(settings.total_timeout_secs),
        }
    }
}

/// Step-level failures, surfaced directly as test failures.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("assertion failed: '{instruction}': {reason}")]
    AssertionFailed { instruction: String, reason: String },

    #[error("'{op}' exceeded the total timeout of {budget_secs:.0}s after {attempts} attempts")]
    Timeout {
        op: &'static str,
        attempts: u32,
        budget_secs: f64,
    },

    #[error("'{op}' failed after {attempts} attempts: {source}")]
    Exhausted {
        op: &'static str,
        attempts: u32,
        source: anyhow::Error,
    },

    #[error("action {action} failed while performing '{instruction}': {source}")]
    Action {
        instruction: String,
        action: String,
        source: anyhow::Error,
    },
}

#[derive(Clone, Copy)]
enum BackendRequest<'i> {
    Plan(&'i str),
    Verify(&'i str),
    Extract(&'i str),
}

enum BackendReply {
    Plan(Vec<PlannedAction>),
    Verdict(Verdict),
    Value(ExtractedValue),
}

/// Natural-language test-step wrapper over one live session.
pub struct Agent<'a> {
    session: &'a dyn SessionDriver,
    backend: Arc<dyn StepBackend>,
    policy: RetryPolicy,
}

impl<'a> Agent<'a> {
    pub fn new(
        session: &'a dyn SessionDriver,
        backend: Arc<dyn StepBackend>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            session,
            backend,
            policy,
        }
    }

    /// Perform a natural-language action (`do`). The backend plans concrete
    /// actions; they execute in order and the first failure stops the step,
    /// leaving the session untouched for the failure hook to inspect.
    pub async fn perform(&self, instruction: &str) -> Result<(), StepError> {
        let reply = self.invoke("do", BackendRequest::Plan(instruction)).await?;
        let BackendReply::Plan(actions) = reply else {
            unreachable!("plan request always yields a plan reply");
        };

        for action in &actions {
            log::debug!("executing {}", action);
            self.apply(action)
                .await
                .map_err(|source| StepError::Action {
                    instruction: instruction.to_string(),
                    action: action.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Evaluate a natural-language assertion (`check`). A negative verdict
    /// fails the step with the backend's reason.
    pub async fn check(&self, instruction: &str) -> Result<(), StepError> {
        let reply = self
            .invoke("check", BackendRequest::Verify(instruction))
            .await?;
        let BackendReply::Verdict(verdict) = reply else {
            unreachable!("verify request always yields a verdict reply");
        };

        if verdict.holds {
            Ok(())
        } else {
            Err(StepError::AssertionFailed {
                instruction: instruction.to_string(),
                reason: if verdict.reason.is_empty() {
                    "condition does not hold".to_string()
                } else {
                    verdict.reason
                },
            })
        }
    }

    /// Extract a natural-language-described value (`get`).
    pub async fn get(&self, instruction: &str) -> Result<ExtractedValue, StepError> {
        let reply = self
            .invoke("get", BackendRequest::Extract(instruction))
            .await?;
        let BackendReply::Value(value) = reply else {
            unreachable!("extract request always yields a value reply");
        };
        Ok(value)
    }

    /// One backend call under the retry policy. Each attempt takes a fresh
    /// page snapshot so retries see the real current state.
    async fn invoke(
        &self,
        op: &'static str,
        request: BackendRequest<'_>,
    ) -> Result<BackendReply, StepError> {
        let start = Instant::now();
        let mut backoff = self.policy.backoff;
        let mut attempt = 0u32;

        loop {
            if start.elapsed() > self.policy.total_timeout {
                return Err(StepError::Timeout {
                    op,
                    attempts: attempt,
                    budget_secs: self.policy.total_timeout.as_secs_f64(),
                });
            }
            attempt += 1;

            let outcome: Result<BackendReply> = async {
                let page = self.session.snapshot().await?;
                match request {
                    BackendRequest::Plan(instruction) => {
                        let actions = self.backend.plan(instruction, &page).await?;
                        if actions.is_empty() {
                            anyhow::bail!("backend returned an empty plan");
                        }
                        Ok(BackendReply::Plan(actions))
                    }
                    BackendRequest::Verify(instruction) => Ok(BackendReply::Verdict(
                        self.backend.verify(instruction, &page).await?,
                    )),
                    BackendRequest::Extract(instruction) => Ok(BackendReply::Value(
                        self.backend.extract(instruction, &page).await?,
                    )),
                }
            }
            .await;

            match outcome {
                Ok(reply) => return Ok(reply),
                Err(source) => {
                    log::warn!("'{}' attempt {} failed: {:#}", op, attempt, source);
                    if attempt >= self.policy.max_retries {
                        return Err(StepError::Exhausted {
                            op,
                            attempts: attempt,
                            source,
                        });
                    }
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn apply(&self, action: &PlannedAction) -> Result<()> {
        match action {
            PlannedAction::Goto { url } => self.session.goto(url).await,
            PlannedAction::Click { selector } => self.session.click(selector).await,
            PlannedAction::Fill { selector, text } => self.session.fill(selector, text).await,
            PlannedAction::Type { text } => self.session.type_text(text).await,
            PlannedAction::Press { key } => self.session.press_key(key).await,
        }
    }
}

//! LLM step backend
//!
//! Speaks OpenAI-compatible chat completions (OpenAI, Ollama) and the
//! Anthropic messages API. Replies are expected to carry a JSON payload;
//! models like to wrap it in prose or code fences, so the payload is fished
//! out with a regex before parsing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::agent::{ExtractedValue, PlannedAction, StepBackend, Verdict};
use crate::driver::web::PageSnapshot;
use crate::utils::config::{Credentials, Provider, Settings};

const ANTHROPIC_VERSION: &str = "2023-06-01";

const PLAN_SYSTEM_PROMPT: &str = "\
You translate a natural-language instruction into browser actions for the \
page described below. Reply with JSON only, no prose, in this shape:
{\"actions\": [
  {\"type\": \"goto\", \"url\": \"...\"},
  {\"type\": \"click\", \"selector\": \"css selector\"},
  {\"type\": \"fill\", \"selector\": \"css selector\", \"text\": \"...\"},
  {\"type\": \"type\", \"text\": \"...\"},
  {\"type\": \"press\", \"key\": \"Enter\"}
]}
Use the smallest plan that accomplishes the instruction. Selectors must \
exist in the provided HTML.";

const VERIFY_SYSTEM_PROMPT: &str = "\
You evaluate whether an assertion holds for the page described below. \
Reply with JSON only: {\"holds\": true|false, \"reason\": \"short explanation\"}";

const EXTRACT_SYSTEM_PROMPT: &str = "\
You extract a value from the page described below. Reply with JSON only: \
{\"kind\": \"text\"|\"bool\"|\"number\", \"value\": ...}";

/// Production [`StepBackend`] backed by a hosted or local LLM.
pub struct LlmBackend {
    client: reqwest::Client,
    provider: Provider,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl LlmBackend {
    pub fn new(settings: &Settings, credentials: &Credentials) -> Result<Self> {
        let llm = &settings.llm;
        let base_url = llm
            .endpoint
            .clone()
            .unwrap_or_else(|| default_endpoint(llm.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(settings.total_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            provider: llm.provider,
            model: llm.model.clone(),
            base_url,
            api_key: credentials.api_key().map(|k| k.to_string()),
        })
    }

    /// One completion round-trip. An empty reply is an error so the agent's
    /// retry policy treats it like any other transient failure.
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let content = match self.provider {
            Provider::OpenAi | Provider::Ollama => self.openai_chat(system, user).await?,
            Provider::Anthropic => self.anthropic_messages(system, user).await?,
        };

        let content = content.trim().to_string();
        if content.is_empty() {
            anyhow::bail!("provider returned an empty completion");
        }
        Ok(content)
    }

    async fn openai_chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("chat completion request to {} failed", self.base_url))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion returned {}: {}", status, detail);
        }

        let reply: serde_json::Value = response.json().await?;
        Ok(reply["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn anthropic_messages(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": 1024,
            "system": system,
            "messages": [
                { "role": "user", "content": user },
            ],
        });

        let mut request = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("messages request to {} failed", self.base_url))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("messages API returned {}: {}", status, detail);
        }

        let reply: serde_json::Value = response.json().await?;
        Ok(reply["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl StepBackend for LlmBackend {
    async fn plan(&self, instruction: &str, page: &PageSnapshot) -> Result<Vec<PlannedAction>> {
        let reply = self
            .complete(PLAN_SYSTEM_PROMPT, &step_prompt(instruction, page))
            .await?;
        parse_plan_reply(&reply)
    }

    async fn verify(&self, instruction: &str, page: &PageSnapshot) -> Result<Verdict> {
        let reply = self
            .complete(VERIFY_SYSTEM_PROMPT, &step_prompt(instruction, page))
            .await?;
        parse_verdict_reply(&reply)
    }

    async fn extract(&self, instruction: &str, page: &PageSnapshot) -> Result<ExtractedValue> {
        let reply = self
            .complete(EXTRACT_SYSTEM_PROMPT, &step_prompt(instruction, page))
            .await?;
        Ok(parse_value_reply(&reply))
    }
}

fn default_endpoint(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "https://api.openai.com",
        Provider::Anthropic => "https://api.anthropic.com",
        Provider::Ollama => "http://localhost:11434",
    }
}

fn step_prompt(instruction: &str, page: &PageSnapshot) -> String {
    format!(
        "Instruction: {}\n\nCurrent page:\nURL: {}\nTitle: {}\nHTML:\n{}",
        instruction, page.url, page.title, page.html
    )
}

/// Pull the first JSON object out of a possibly chatty reply.
fn extract_json(reply: &str) -> Option<&str> {
    // Greedy: first '{' through last '}'
    let re = Regex::new(r"(?s)\{.*\}").ok()?;
    re.find(reply).map(|m| m.as_str())
}

#[derive(Deserialize)]
struct PlanWire {
    actions: Vec<PlannedAction>,
}

fn parse_plan_reply(reply: &str) -> Result<Vec<PlannedAction>> {
    let payload = extract_json(reply)
        .with_context(|| format!("plan reply carries no JSON payload: {}", reply))?;
    let wire: PlanWire = serde_json::from_str(payload)
        .with_context(|| format!("plan reply is not valid plan JSON: {}", payload))?;
    Ok(wire.actions)
}

fn parse_verdict_reply(reply: &str) -> Result<Verdict> {
    let payload = extract_json(reply)
        .with_context(|| format!("verdict reply carries no JSON payload: {}", reply))?;
    let verdict: Verdict = serde_json::from_str(payload)
        .with_context(|| format!("verdict reply is not valid verdict JSON: {}", payload))?;
    Ok(verdict)
}

#[derive(Deserialize)]
struct ValueWire {
    kind: String,
    value: serde_json::Value,
}

/// Parse an extraction reply. Unparsable replies degrade to text rather
/// than failing the step; the instruction asked for a value and the reply
/// is the closest thing to one we have.
fn parse_value_reply(reply: &str) -> ExtractedValue {
    let parsed = extract_json(reply)
        .and_then(|payload| serde_json::from_str::<ValueWire>(payload).ok());

    let Some(wire) = parsed else {
        return ExtractedValue::Text(reply.trim().to_string());
    };

    match wire.kind.as_str() {
        "bool" => wire
            .value
            .as_bool()
            .map(ExtractedValue::Bool)
            .unwrap_or_else(|| ExtractedValue::Text(wire.value.to_string())),
        "number" => wire
            .value
            .as_f64()
            .map(ExtractedValue::Number)
            .unwrap_or_else(|| ExtractedValue::Text(wire.value.to_string())),
        _ => match wire.value {
            serde_json::Value::String(s) => ExtractedValue::Text(s),
            other => ExtractedValue::Text(other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_with_code_fence() {
        let reply = r#"Sure, here is the plan:
```json
{"actions": [
  {"type": "fill", "selector": "input[name=q]", "text": "Mercury element"},
  {"type": "press", "key": "Enter"}
]}
```"#;
        let plan = parse_plan_reply(reply).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan[0],
            PlannedAction::Fill {
                selector: "input[name=q]".into(),
                text: "Mercury element".into()
            }
        );
    }

    #[test]
    fn test_parse_plan_rejects_prose() {
        assert!(parse_plan_reply("I could not find a search box.").is_err());
    }

    #[test]
    fn test_parse_verdict() {
        let verdict =
            parse_verdict_reply(r#"{"holds": false, "reason": "title says Venus"}"#).unwrap();
        assert!(!verdict.holds);
        assert_eq!(verdict.reason, "title says Venus");

        // missing reason defaults to empty
        let verdict = parse_verdict_reply(r#"{"holds": true}"#).unwrap();
        assert!(verdict.holds);
        assert!(verdict.reason.is_empty());
    }

    #[test]
    fn test_parse_typed_values() {
        assert_eq!(
            parse_value_reply(r#"{"kind": "text", "value": "Example Domain"}"#),
            ExtractedValue::Text("Example Domain".into())
        );
        assert_eq!(
            parse_value_reply(r#"{"kind": "bool", "value": true}"#),
            ExtractedValue::Bool(true)
        );
        assert_eq!(
            parse_value_reply(r#"{"kind": "number", "value": 42.5}"#),
            ExtractedValue::Number(42.5)
        );
    }

    #[test]
    fn test_unparsable_value_degrades_to_text() {
        assert_eq!(
            parse_value_reply("The heading says Example Domain"),
            ExtractedValue::Text("The heading says Example Domain".into())
        );
    }

    #[test]
    fn test_default_endpoints() {
        assert_eq!(default_endpoint(Provider::Ollama), "http://localhost:11434");
        assert_eq!(default_endpoint(Provider::OpenAi), "https://api.openai.com");
    }
}

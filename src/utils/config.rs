//! Settings and credential resolution
//!
//! Settings come from an optional YAML file (a `default` section plus named
//! environment overlays selected by `SAGE_ENV`) with individual `SAGE_*`
//! environment variables taking precedence. Credentials are read from the
//! process environment only, once, and are never written anywhere.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Configuration-level failures. These are fatal before any browser work.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required credential: set {var} in the environment")]
    MissingCredential { var: &'static str },

    #[error("unknown LLM provider '{0}' (expected one of: openai, anthropic, ollama)")]
    UnknownProvider(String),
}

/// Supported LLM providers for the test-step backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl Provider {
    /// Environment variable holding the provider API key, if one is required.
    pub fn key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Ollama => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        }
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "ollama" => Ok(Provider::Ollama),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// LLM backend settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    /// Base URL for self-hosted providers (Ollama). Ignored for hosted ones.
    pub endpoint: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            endpoint: None,
        }
    }
}

/// Runtime settings for a test run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL test cases navigate to by default
    pub base_url: Option<String>,

    /// Run the browser headless
    pub headless: bool,

    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Default per-operation wait (ms) applied to the browser session
    pub default_timeout_ms: u64,

    /// Max attempts per AI backend call
    pub max_retries: u32,

    /// Initial backoff between attempts (seconds), doubled each retry
    pub retry_backoff_secs: f64,

    /// Total wall-clock budget for one AI-backed operation (seconds)
    pub total_timeout_secs: f64,

    pub llm: LlmSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: None,
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            default_timeout_ms: 10_000,
            max_retries: 3,
            retry_backoff_secs: 5.0,
            total_timeout_secs: 60.0,
            llm: LlmSettings::default(),
        }
    }
}

/// One section of the settings file. Every field is optional so an overlay
/// only has to name what it changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    pub base_url: Option<String>,
    pub headless: Option<bool>,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
    pub default_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_secs: Option<f64>,
    pub total_timeout_secs: Option<f64>,
    pub llm: Option<LlmPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LlmPatch {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

/// Shape of the settings file: defaults plus named environment overlays.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    default: SettingsPatch,
    #[serde(default)]
    environments: HashMap<String, SettingsPatch>,
}

impl Settings {
    /// Load settings: built-in defaults, then the file's `default` section,
    /// then the overlay named by `SAGE_ENV`, then `SAGE_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read settings file {}", path.display()))?;
            let file: SettingsFile = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse settings file {}", path.display()))?;

            settings.apply(&file.default);

            if let Ok(env_name) = std::env::var("SAGE_ENV") {
                match file.environments.get(&env_name) {
                    Some(overlay) => settings.apply(overlay),
                    None => log::warn!(
                        "SAGE_ENV={} has no matching section in {}",
                        env_name,
                        path.display()
                    ),
                }
            }
        }

        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Overlay a patch onto these settings.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = &patch.base_url {
            self.base_url = Some(v.clone());
        }
        if let Some(v) = patch.headless {
            self.headless = v;
        }
        if let Some(v) = patch.viewport_width {
            self.viewport_width = v;
        }
        if let Some(v) = patch.viewport_height {
            self.viewport_height = v;
        }
        if let Some(v) = patch.default_timeout_ms {
            self.default_timeout_ms = v;
        }
        if let Some(v) = patch.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = patch.retry_backoff_secs {
            self.retry_backoff_secs = v;
        }
        if let Some(v) = patch.total_timeout_secs {
            self.total_timeout_secs = v;
        }
        if let Some(llm) = &patch.llm {
            if let Some(p) = llm.provider {
                self.llm.provider = p;
            }
            if let Some(m) = &llm.model {
                self.llm.model = m.clone();
            }
            if let Some(e) = &llm.endpoint {
                self.llm.endpoint = Some(e.clone());
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("SAGE_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("SAGE_HEADLESS") {
            self.headless = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SAGE_TIMEOUT_MS") {
            self.default_timeout_ms = v
                .parse()
                .context("SAGE_TIMEOUT_MS must be an integer number of milliseconds")?;
        }
        if let Ok(v) = std::env::var("SAGE_LLM_PROVIDER") {
            self.llm.provider = Provider::from_str(&v)?;
        }
        if let Ok(v) = std::env::var("SAGE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("SAGE_LLM_ENDPOINT") {
            self.llm.endpoint = Some(v);
        }
        Ok(())
    }
}

/// Opaque provider credential, read once from the environment.
#[derive(Clone)]
pub struct Credentials {
    api_key: Option<String>,
}

impl Credentials {
    /// Resolve the credential the given provider requires. Fails before any
    /// browser work when the variable is absent or empty.
    pub fn resolve(provider: Provider) -> Result<Self, ConfigError> {
        match provider.key_env() {
            None => Ok(Self { api_key: None }),
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Ok(Self { api_key: Some(key) }),
                _ => Err(ConfigError::MissingCredential { var }),
            },
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

// Keys must never end up in logs or reports.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// ReportPortal connection settings. All-absent means reporting is disabled.
#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub endpoint: String,
    pub api_key: String,
    pub project: String,
    pub launch: String,
}

impl PortalSettings {
    /// Read `RP_ENDPOINT` / `RP_API_KEY` / `RP_PROJECT` / `RP_LAUNCH`.
    /// A partial set disables reporting with a warning rather than failing:
    /// reporting is best effort and must never block a run.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("RP_ENDPOINT").ok();
        let api_key = std::env::var("RP_API_KEY").ok();
        let project = std::env::var("RP_PROJECT").ok();
        let launch = std::env::var("RP_LAUNCH").unwrap_or_else(|_| "sage-tester".to_string());

        match (endpoint, api_key, project) {
            (Some(endpoint), Some(api_key), Some(project)) => Some(Self {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_key,
                project,
                launch,
            }),
            (None, None, None) => None,
            (endpoint, api_key, project) => {
                let mut missing = Vec::new();
                if endpoint.is_none() {
                    missing.push("RP_ENDPOINT");
                }
                if api_key.is_none() {
                    missing.push("RP_API_KEY");
                }
                if project.is_none() {
                    missing.push("RP_PROJECT");
                }
                log::warn!(
                    "ReportPortal partially configured, reporting disabled (missing: {})",
                    missing.join(", ")
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::from_str("openai").unwrap(), Provider::OpenAi);
        assert_eq!(Provider::from_str(" Ollama ").unwrap(), Provider::Ollama);
        assert!(Provider::from_str("gemini").is_err());
    }

    #[test]
    fn test_patch_overlay() {
        let mut settings = Settings::default();
        let file: SettingsFile = serde_yaml::from_str(
            r#"
default:
  baseUrl: "https://duckduckgo.com"
  headless: true
  maxRetries: 2
environments:
  staging:
    baseUrl: "https://staging.example.com"
    llm:
      provider: ollama
      model: "llama3.1"
      endpoint: "http://localhost:11434"
"#,
        )
        .unwrap();

        settings.apply(&file.default);
        assert_eq!(settings.base_url.as_deref(), Some("https://duckduckgo.com"));
        assert_eq!(settings.max_retries, 2);
        // untouched fields keep defaults
        assert_eq!(settings.total_timeout_secs, 60.0);

        settings.apply(file.environments.get("staging").unwrap());
        assert_eq!(
            settings.base_url.as_deref(),
            Some("https://staging.example.com")
        );
        assert_eq!(settings.llm.provider, Provider::Ollama);
        assert_eq!(settings.llm.model, "llama3.1");
        // overlay did not reset unrelated fields
        assert_eq!(settings.max_retries, 2);
    }

    #[test]
    fn test_credentials_resolution() {
        // Ollama needs no key at all.
        assert!(Credentials::resolve(Provider::Ollama)
            .unwrap()
            .api_key()
            .is_none());

        // Hosted provider with the variable unset must fail fast.
        std::env::remove_var("ANTHROPIC_API_KEY");
        let err = Credentials::resolve(Provider::Anthropic).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                var: "ANTHROPIC_API_KEY"
            }
        ));

        std::env::set_var("ANTHROPIC_API_KEY", "sk-test");
        let creds = Credentials::resolve(Provider::Anthropic).unwrap();
        assert_eq!(creds.api_key(), Some("sk-test"));
        // Debug output must not leak the key.
        assert!(!format!("{:?}", creds).contains("sk-test"));
        std::env::remove_var("ANTHROPIC_API_KEY");
    }
}

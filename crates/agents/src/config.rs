//! Environment-driven configuration for the oracle client and the pipeline

use std::time::Duration;

const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "llava:latest";
const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TEMPERATURE: f32 = 0.73;
const DEFAULT_TOP_P: f32 = 0.88;

const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_FIX_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_HISTORY_TURNS: usize = 10;

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Which chat API the oracle client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleProvider {
    /// `POST {url}/chat/completions` with bearer auth
    OpenAi,
    /// `POST {url}/openai/deployments/{model}/chat/completions?api-version=...`
    Azure,
    /// `POST {url}/api/chat`
    Ollama,
}

impl OracleProvider {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" | "openai-compatible" => Some(Self::OpenAi),
            "azure" | "azure_openai" | "azure-openai" => Some(Self::Azure),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }
}

/// Oracle client settings
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub provider: OracleProvider,
    pub base_url: String,
    /// Model name, or deployment name for Azure
    pub model: String,
    pub api_key: Option<String>,
    pub api_version: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub top_p: f32,
}

impl OracleConfig {
    pub fn from_env() -> Self {
        let provider = OracleProvider::parse(&env_or_default("ORACLE_PROVIDER", DEFAULT_PROVIDER))
            .unwrap_or(OracleProvider::OpenAi);

        let (base_url, model, api_key) = match provider {
            OracleProvider::OpenAi => (
                env_or_default("ORACLE_URL", DEFAULT_OPENAI_URL),
                env_or_default("ORACLE_MODEL", DEFAULT_OPENAI_MODEL),
                env_opt("ORACLE_API_KEY").or_else(|| env_opt("OPENAI_API_KEY")),
            ),
            OracleProvider::Azure => (
                env_opt("ORACLE_URL")
                    .or_else(|| env_opt("AZURE_OPENAI_ENDPOINT_URL"))
                    .unwrap_or_default(),
                env_opt("ORACLE_MODEL")
                    .or_else(|| env_opt("AZURE_OPENAI_DEPLOYMENT_NAME"))
                    .unwrap_or_default(),
                env_opt("ORACLE_API_KEY").or_else(|| env_opt("AZURE_OPENAI_API_KEY")),
            ),
            OracleProvider::Ollama => (
                env_or_default("ORACLE_URL", DEFAULT_OLLAMA_URL),
                env_or_default("ORACLE_MODEL", DEFAULT_OLLAMA_MODEL),
                env_opt("ORACLE_API_KEY"),
            ),
        };

        Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            api_version: env_or_default("AZURE_OPENAI_API_VERSION", DEFAULT_AZURE_API_VERSION),
            timeout: Duration::from_secs(
                env_parse("ORACLE_TIMEOUT_SECS")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            temperature: env_parse("ORACLE_TEMPERATURE").unwrap_or(DEFAULT_TEMPERATURE),
            top_p: env_parse("ORACLE_TOP_P").unwrap_or(DEFAULT_TOP_P),
        }
    }

    /// Local Ollama with a vision model
    pub fn ollama(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: OracleProvider::Ollama,
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
        }
    }
}

/// How many times the fix pass may ask the oracle, and how long to wait
/// between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = (!backoff.is_zero()).then_some(backoff);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FIX_MAX_ATTEMPTS)
    }
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sections in flight at once
    pub max_concurrency: usize,
    pub fix_retry: RetryPolicy,
    /// Conversation turns forwarded to the query responder
    pub history_turns: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fix_retry: RetryPolicy::default(),
            history_turns: DEFAULT_HISTORY_TURNS,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let max_attempts = env_parse("FLOWGRAPH_FIX_MAX_ATTEMPTS")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_FIX_MAX_ATTEMPTS);
        let backoff_ms: u64 = env_parse("FLOWGRAPH_FIX_BACKOFF_MS").unwrap_or(0);

        Self {
            max_concurrency: env_parse("FLOWGRAPH_MAX_CONCURRENCY")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENCY),
            fix_retry: RetryPolicy::new(max_attempts)
                .with_backoff(Duration::from_millis(backoff_ms)),
            history_turns: env_parse("FLOWGRAPH_HISTORY_TURNS").unwrap_or(DEFAULT_HISTORY_TURNS),
        }
    }
}

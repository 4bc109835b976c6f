//! HTTP chat client implementing the extraction oracle (OpenAI-compatible,
//! Azure OpenAI and Ollama).

use crate::config::{OracleConfig, OracleProvider};
use crate::oracle::{ContentPart, ExtractionOracle, OracleMessage, OracleRole};
use crate::{AgentError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    config: OracleConfig,
}

impl ChatClient {
    pub fn new(config: OracleConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(AgentError::InvalidInput(
                "oracle URL is not configured (ORACLE_URL)".into(),
            ));
        }
        if config.provider == OracleProvider::Azure && config.model.is_empty() {
            return Err(AgentError::InvalidInput(
                "Azure deployment name is not configured (AZURE_OPENAI_DEPLOYMENT_NAME)".into(),
            ));
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OracleConfig::from_env())
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Whether the oracle endpoint answers
    pub async fn health(&self) -> Result<bool> {
        let request = match self.config.provider {
            OracleProvider::OpenAi => self.authorized(self.client.get(format!("{}/models", self.config.base_url))),
            OracleProvider::Azure => self.authorized(self.client.get(format!(
                "{}/openai/models?api-version={}",
                self.config.base_url, self.config.api_version
            ))),
            OracleProvider::Ollama => self.client.get(format!("{}/api/tags", self.config.base_url)),
        };

        let response = request.send().await?;
        Ok(response.status().is_success())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.api_key, self.config.provider) {
            (Some(key), OracleProvider::Azure) => request.header("api-key", key),
            (Some(key), _) => request.bearer_auth(key),
            (None, _) => request,
        }
    }

    async fn chat_completions(&self, messages: &[OracleMessage]) -> Result<Option<String>> {
        let (url, model) = match self.config.provider {
            OracleProvider::Azure => (
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    self.config.base_url, self.config.model, self.config.api_version
                ),
                None,
            ),
            _ => (
                format!("{}/chat/completions", self.config.base_url),
                Some(self.config.model.as_str()),
            ),
        };

        let request = ChatCompletionRequest {
            model,
            messages: messages.iter().map(chat_completion_message).collect(),
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stream: false,
        };

        let response = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(parse_chat_completion(&response))
    }

    async fn ollama_chat(&self, messages: &[OracleMessage]) -> Result<Option<String>> {
        let url = format!("{}/api/chat", self.config.base_url);
        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(ollama_message).collect(),
            stream: false,
            options: json!({
                "temperature": self.config.temperature,
                "top_p": self.config.top_p,
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<OllamaChatResponse>()
            .await?;

        Ok(response
            .message
            .map(|m| m.content)
            .filter(|content| !content.trim().is_empty()))
    }
}

#[async_trait]
impl ExtractionOracle for ChatClient {
    async fn complete(&self, messages: Vec<OracleMessage>) -> Result<Option<String>> {
        debug!(
            provider = ?self.config.provider,
            messages = messages.len(),
            "Sending oracle request"
        );

        let reply = match self.config.provider {
            OracleProvider::OpenAi | OracleProvider::Azure => self.chat_completions(&messages).await?,
            OracleProvider::Ollama => self.ollama_chat(&messages).await?,
        };

        match &reply {
            Some(text) => debug!(chars = text.len(), "Oracle replied"),
            None => warn!("No valid response from the oracle"),
        }
        Ok(reply)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<Value>,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    options: Value,
}

#[derive(Serialize)]
struct OllamaChatMessage {
    role: OracleRole,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaChatMessageResponse>,
}

#[derive(Deserialize)]
struct OllamaChatMessageResponse {
    #[serde(default)]
    content: String,
}

/// Plain text messages use string content; messages with images use the
/// multi-part form with data URLs.
fn chat_completion_message(message: &OracleMessage) -> Value {
    let has_image = message
        .parts
        .iter()
        .any(|part| matches!(part, ContentPart::Image(_)));

    if !has_image {
        return json!({ "role": message.role, "content": message.text_content() });
    }

    let parts: Vec<Value> = message
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "type": "text", "text": text }),
            ContentPart::Image(data) => json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{data}") }
            }),
        })
        .collect();

    json!({ "role": message.role, "content": parts })
}

fn ollama_message(message: &OracleMessage) -> OllamaChatMessage {
    OllamaChatMessage {
        role: message.role,
        content: message.text_content(),
        images: message.images().map(String::from).collect(),
    }
}

/// First choice's content, or `None` if the reply carries no choices
fn parse_chat_completion(response: &Value) -> Option<String> {
    response
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(String::from)
}

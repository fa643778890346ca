//! HTTP model providers. The rest of the crate only sees [`ModelProvider`];
//! the provider call is the single point in a task allowed to block on the
//! network, and it always carries an explicit request timeout.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::constants::DEFAULT_GEMINI_API_PATH;
use crate::domain::{ChatMessage, MessageRole};

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: ChatMessage,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("provider '{provider}' requires an API key")]
    MissingApiKey { provider: String },
    #[error("network error calling provider '{provider}': {source}")]
    Network {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("provider '{provider}' returned invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
    #[error("unsupported provider type '{provider_type}'")]
    UnsupportedProviderType { provider_type: String },
}

impl ModelError {
    pub fn missing_api_key(provider: impl Into<String>) -> Self {
        Self::MissingApiKey {
            provider: provider.into(),
        }
    }

    pub fn network(provider: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            provider: provider.into(),
            source,
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ModelError::MissingApiKey { provider } => format!(
                "Provider '{provider}' requires an API key. Set the environment variable named in the configuration."
            ),
            ModelError::Network { provider, source } => {
                if source.is_connect() {
                    format!(
                        "Could not reach model provider '{provider}'. Check that the endpoint is running and reachable."
                    )
                } else if source.is_timeout() {
                    format!("Request to model provider '{provider}' timed out. Try again shortly.")
                } else if let Some(status) = source.status() {
                    match status {
                        StatusCode::NOT_FOUND => format!(
                            "Provider '{provider}' returned 404. Check the endpoint and model name."
                        ),
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            format!("Model provider '{provider}' is currently unavailable.")
                        }
                        _ => format!(
                            "Request to model provider '{provider}' failed with status {}.",
                            status.as_u16()
                        ),
                    }
                } else {
                    format!("A network error occurred while contacting provider '{provider}'.")
                }
            }
            ModelError::InvalidResponse { provider, .. } => {
                format!("Model provider '{provider}' returned a response that could not be processed.")
            }
            ModelError::UnsupportedProviderType { provider_type } => {
                format!("Provider type '{provider_type}' is not supported. Use 'ollama' or 'gemini'.")
            }
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Build a provider from resolved configuration. The API key is read from
/// the environment variable named in the config, never stored in the file.
pub fn provider_from_config(config: &ProviderConfig) -> Result<DynamicProvider, ModelError> {
    match config.provider_type.to_lowercase().as_str() {
        "ollama" => Ok(DynamicProvider::Ollama(OllamaClient::new(
            config.endpoint.clone(),
        ))),
        "gemini" => {
            let api_key = resolve_api_key(config.api_key_env.as_deref());
            Ok(DynamicProvider::Gemini(GeminiClient::new(
                config.endpoint.clone(),
                api_key,
                DEFAULT_GEMINI_API_PATH,
            )))
        }
        other => Err(ModelError::UnsupportedProviderType {
            provider_type: other.to_string(),
        }),
    }
}

fn resolve_api_key(env_name: Option<&str>) -> Option<String> {
    let name = env_name.map(str::trim).filter(|name| !name.is_empty())?;
    match env::var(name) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(env_var = name, %err, "API key environment variable is not set or unreadable");
            None
        }
    }
}

#[derive(Clone, Debug)]
pub enum DynamicProvider {
    Ollama(OllamaClient),
    Gemini(GeminiClient),
}

#[async_trait]
impl ModelProvider for DynamicProvider {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        match self {
            DynamicProvider::Ollama(client) => client.chat(request).await,
            DynamicProvider::Gemini(client) => client.chat(request).await,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            http: client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{trimmed}/{path}")
    }
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = self.endpoint("/api/chat");
        let payload = OllamaChatRequest::from(&request);
        info!(
            model = request.model.as_str(),
            url = %url,
            messages = request.messages.len(),
            "Sending request to Ollama provider"
        );
        let response: OllamaChatResponse = self
            .http
            .post(url)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ModelError::network("ollama", err))?
            .error_for_status()
            .map_err(|err| ModelError::network("ollama", err))?
            .json()
            .await
            .map_err(|err| ModelError::network("ollama", err))?;
        debug!("Received response from Ollama provider");

        let message = response
            .message
            .ok_or_else(|| ModelError::invalid_response("ollama", "missing message field"))?;
        let role = MessageRole::from_str(message.role.as_str())
            .ok_or_else(|| ModelError::invalid_response("ollama", "unknown role in response"))?;

        Ok(ModelResponse {
            message: ChatMessage::new(role, message.content),
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
}

impl From<&ModelRequest> for OllamaChatRequest {
    fn from(value: &ModelRequest) -> Self {
        Self {
            model: value.model.clone(),
            messages: value
                .messages
                .iter()
                .map(|msg| OllamaChatMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                    images: if msg.images.is_empty() {
                        None
                    } else {
                        Some(msg.images.clone())
                    },
                })
                .collect(),
            stream: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaChatMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaChatMessage>,
}

#[derive(Clone, Debug)]
pub struct GeminiClient {
    endpoint: String,
    api_key: Option<String>,
    api_path: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        api_path: impl Into<String>,
    ) -> Self {
        Self::with_client(endpoint, api_key, api_path, Client::new())
    }

    pub fn with_client(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        api_path: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            api_path: api_path.into(),
            http: client,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{base}/{}/{model}:generateContent", self.api_path)
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let api_key = match &self.api_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => return Err(ModelError::missing_api_key("gemini")),
        };

        let url = format!("{}?key={}", self.endpoint(&request.model), api_key);
        let payload = GeminiChatRequest::from(&request);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Sending request to Gemini provider"
        );
        let response: GeminiChatResponse = self
            .http
            .post(url)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ModelError::network("gemini", err))?
            .error_for_status()
            .map_err(|err| ModelError::network("gemini", err))?
            .json()
            .await
            .map_err(|err| ModelError::network("gemini", err))?;
        debug!("Received response from Gemini provider");

        let text = response
            .candidates
            .unwrap_or_default()
            .into_iter()
            .flat_map(|candidate| candidate.content)
            .flat_map(|content| content.parts.into_iter())
            .find_map(|part| part.text)
            .ok_or_else(|| ModelError::invalid_response("gemini", "missing text in response"))?;

        Ok(ModelResponse {
            message: ChatMessage::new(MessageRole::Assistant, text),
        })
    }
}

#[derive(Debug, Serialize)]
struct GeminiChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiInstruction>,
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

impl From<&ModelRequest> for GeminiChatRequest {
    fn from(request: &ModelRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            match message.role {
                MessageRole::System => system_parts.push(message.content.clone()),
                MessageRole::User | MessageRole::Assistant => {
                    let role = if message.role == MessageRole::User {
                        "user"
                    } else {
                        "model"
                    };
                    let mut parts = vec![GeminiPart::text(message.content.clone())];
                    for image in &message.images {
                        parts.push(GeminiPart::inline_png(image.clone()));
                    }
                    contents.push(GeminiContent {
                        role: role.to_string(),
                        parts,
                    });
                }
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiInstruction {
                parts: vec![GeminiPart::text(system_parts.join("\n\n"))],
            })
        };

        Self {
            system_instruction,
            contents,
            generation_config: GeminiGenerationConfig::json_response(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline_png(data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(GeminiInlineData {
                mime_type: "image/png".to_string(),
                data,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

impl GeminiGenerationConfig {
    fn json_response() -> Self {
        Self {
            response_mime_type: "application/json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiChatResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

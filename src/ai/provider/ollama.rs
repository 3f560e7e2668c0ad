//! Ollama Local Adapter
//!
//! Talks to a locally running Ollama server through `/api/chat`. No key is
//! needed; the service counts as configured when its endpoint is a valid
//! http(s) URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{
    GenerationRequest, HealthStatus, ResponseEnvelope, ServiceAdapter, ServiceIdentity,
    TokenUsage, build_http_client, classify_failed_response,
};
use crate::config::ServiceConfig;
use crate::types::{DispatchError, ErrorClassifier, RelayError, Result};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";

pub struct OllamaAdapter {
    identity: ServiceIdentity,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OllamaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaAdapter")
            .field("identity", &self.identity)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OllamaAdapter {
    /// An invalid endpoint leaves the adapter unconfigured rather than failing
    /// construction, so one bad entry cannot take down the whole dispatcher.
    pub fn new(name: &str, config: &ServiceConfig) -> Result<Self> {
        let raw_base = config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
        let (api_base, configured) = match Self::validate_endpoint(raw_base) {
            Ok(base) => (base, true),
            Err(e) => {
                warn!(service = name, error = %e, "Ollama endpoint rejected, service unconfigured");
                (raw_base.to_string(), false)
            }
        };
        let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            identity: ServiceIdentity::new(name, model, configured),
            api_base,
            client: build_http_client(config.timeout_secs)?,
        })
    }

    /// Validate endpoint URL (SSRF prevention)
    ///
    /// Only allows http/https schemes and warns for non-localhost endpoints.
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            RelayError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        {
            warn!(host, "Ollama endpoint is not localhost. Ensure this is intentional.");
        }

        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    fn build_request(&self, request: &GenerationRequest) -> ChatRequest {
        ChatRequest {
            model: self.identity.default_model.clone(),
            messages: request
                .messages()
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            options: ChatOptions {
                temperature: request.temperature(),
                num_predict: request.max_tokens(),
            },
            format: request.structured_output().then_some("json"),
        }
    }

    fn map_transport(&self, err: &reqwest::Error) -> DispatchError {
        if err.is_connect() {
            DispatchError::unknown(
                self.identity.name.as_str(),
                format!(
                    "Failed to connect to Ollama at {}. Is Ollama running? Start with: ollama serve",
                    self.api_base
                ),
            )
        } else {
            ErrorClassifier::classify_transport(err, &self.identity.name)
        }
    }
}

#[async_trait]
impl ServiceAdapter for OllamaAdapter {
    fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<ResponseEnvelope, DispatchError> {
        let service = self.identity.name.as_str();
        info!(
            service,
            model = %self.identity.default_model,
            temperature = request.temperature(),
            "Generating with Ollama"
        );

        let start_time = Instant::now();
        let url = format!("{}/api/chat", self.api_base);

        let response = self
            .client
            .post(&url)
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| self.map_transport(&e))?;

        if !response.status().is_success() {
            return Err(classify_failed_response(response, service).await);
        }

        let body = response.text().await.map_err(|e| self.map_transport(&e))?;
        let elapsed = start_time.elapsed();

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            DispatchError::invalid_response(service, format!("malformed response body: {}", e))
        })?;

        let content = parsed
            .message
            .map(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DispatchError::invalid_response(service, "response contained no content"))?;

        let usage = TokenUsage::new(
            parsed.prompt_eval_count.unwrap_or(0),
            parsed.eval_count.unwrap_or(0),
        );

        debug!(service, latency_ms = elapsed.as_millis() as u64, "Ollama response received");

        Ok(ResponseEnvelope::new(
            content,
            service,
            parsed.model.unwrap_or_else(|| self.identity.default_model.clone()),
        )
        .with_usage(usage)
        .with_latency(elapsed)
        .with_metadata("done_reason", parsed.done_reason))
    }

    /// Cheaper than a generation: list local models and check ours is pulled
    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let url = format!("{}/api/tags", self.api_base);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                return HealthStatus::unhealthy(self.map_transport(&e).to_string(), Some(start.elapsed()));
            }
        };

        if !response.status().is_success() {
            let err = classify_failed_response(response, &self.identity.name).await;
            return HealthStatus::from_probe(Err(err), start.elapsed());
        }

        let latency = start.elapsed();
        let model = self.identity.default_model.as_str();
        match response.json::<TagsResponse>().await {
            Ok(tags) if !tags.has_model(model) => HealthStatus::degraded(
                latency,
                Some(format!(
                    "model '{}' not found. Pull with: ollama pull {}",
                    model, model
                )),
            ),
            Ok(_) => HealthStatus::from_probe(Ok(()), latency),
            Err(e) => HealthStatus::from_probe(
                Err(DispatchError::invalid_response(
                    &self.identity.name,
                    format!("unreadable model list: {}", e),
                )),
                latency,
            ),
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    message: Option<ResponseMessage>,
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

impl TagsResponse {
    /// Exact tag match, or same model name when asking for `latest`
    fn has_model(&self, model: &str) -> bool {
        let base = match model.split_once(':') {
            None => model,
            Some((base, "latest")) => base,
            Some(_) => return self.models.iter().any(|m| m.name == model),
        };
        self.models
            .iter()
            .any(|m| m.name.split(':').next() == Some(base))
    }
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

//! Anthropic Messages Adapter
//!
//! The Messages API takes the system prompt as a top-level field, so system
//! messages are lifted out of the conversation. It has no JSON mode; for
//! structured requests an instruction is appended to the system prompt and
//! callers should parse defensively via `ResponseEnvelope::parse_structured`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{
    GenerationRequest, ResponseEnvelope, Role, ServiceAdapter, ServiceIdentity, TokenUsage,
    build_http_client, resolve_api_key,
};
use crate::config::ServiceConfig;
use crate::types::{DispatchError, ErrorClassifier, Result, parse_rate_limit_delay};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";
const JSON_INSTRUCTION: &str = "Respond ONLY with valid JSON, no explanation or code fences.";

pub struct AnthropicAdapter {
    identity: ServiceIdentity,
    api_key: Option<SecretString>,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("identity", &self.identity)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(name: &str, config: &ServiceConfig) -> Result<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), API_KEY_ENV).map(SecretString::from);
        let api_base = config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());

        if api_key.is_none() {
            debug!(service = name, "No Anthropic API key, service unconfigured");
        }

        Ok(Self {
            identity: ServiceIdentity::new(name, model, api_key.is_some()),
            api_key,
            api_base,
            client: build_http_client(config.timeout_secs)?,
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> MessagesRequest {
        let mut system_parts: Vec<&str> = request
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if request.structured_output() {
            system_parts.push(JSON_INSTRUCTION);
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

        MessagesRequest {
            model: self.identity.default_model.clone(),
            system,
            messages: request
                .messages()
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| AnthropicMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens(),
            temperature: request.temperature(),
        }
    }
}

/// Classify a failed response, letting the body's `error.type` win over the status
fn classify_error(
    status: u16,
    body: &str,
    service: &str,
    retry_after: Option<Duration>,
) -> DispatchError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return ErrorClassifier::classify_http_status(status, body, service, retry_after);
    };

    let detail = envelope.error;
    let message = format!("{}: {}", detail.error_type, detail.message);
    let err = match detail.error_type.as_str() {
        "authentication_error" | "permission_error" => {
            DispatchError::authentication(service, message)
        }
        "rate_limit_error" => {
            let wait = retry_after.or_else(|| parse_rate_limit_delay(&detail.message));
            DispatchError::rate_limited(service, message, wait)
        }
        "overloaded_error" | "api_error" => DispatchError::server_error(service, message),
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            DispatchError::unknown(service, message).non_retryable()
        }
        _ => return ErrorClassifier::classify_http_status(status, body, service, retry_after),
    };

    err.with_status(status)
}

#[async_trait]
impl ServiceAdapter for AnthropicAdapter {
    fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    fn supports_structured_output(&self) -> bool {
        false
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<ResponseEnvelope, DispatchError> {
        let service = self.identity.name.as_str();
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            DispatchError::authentication(
                service,
                format!("API key not found. Set {} or provide api_key in config", API_KEY_ENV),
            )
        })?;

        info!(
            service,
            model = %self.identity.default_model,
            temperature = request.temperature(),
            "Generating with Anthropic"
        );

        let start_time = Instant::now();
        let url = format!("{}/messages", self.api_base);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, service))?;

        let status = response.status();
        let retry_after = ErrorClassifier::parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, service))?;
        let elapsed = start_time.elapsed();

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body, service, retry_after));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            DispatchError::invalid_response(service, format!("malformed response body: {}", e))
        })?;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if content.trim().is_empty() {
            return Err(DispatchError::invalid_response(
                service,
                "response contained no text content",
            ));
        }

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        debug!(service, latency_ms = elapsed.as_millis() as u64, "Anthropic response received");

        Ok(ResponseEnvelope::new(
            content,
            service,
            parsed.model.unwrap_or_else(|| self.identity.default_model.clone()),
        )
        .with_usage(usage)
        .with_latency(elapsed)
        .with_metadata("stop_reason", parsed.stop_reason)
        .with_metadata("response_id", parsed.id))
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    message: String,
}

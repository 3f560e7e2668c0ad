//! OpenAI Chat Completions Adapter
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol, so it also
//! covers gateways and self-hosted servers that mirror that API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::{
    GenerationRequest, ResponseEnvelope, ServiceAdapter, ServiceIdentity, TokenUsage,
    build_http_client, classify_failed_response, resolve_api_key,
};
use crate::config::ServiceConfig;
use crate::types::{DispatchError, ErrorClassifier, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI adapter with secure API key handling
pub struct OpenAiAdapter {
    identity: ServiceIdentity,
    /// Never exposed in logs or debug output
    api_key: Option<SecretString>,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("identity", &self.identity)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OpenAiAdapter {
    /// A missing key is not an error here: the adapter reports itself
    /// unconfigured and the dispatcher skips it.
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
            debug!(service = name, "No OpenAI API key, service unconfigured");
        }

        Ok(Self {
            identity: ServiceIdentity::new(name, model, api_key.is_some()),
            api_key,
            api_base,
            client: build_http_client(config.timeout_secs)?,
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.identity.default_model.clone(),
            messages: request
                .messages()
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature(),
            max_tokens: request.max_tokens(),
            response_format: request.structured_output().then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

#[async_trait]
impl ServiceAdapter for OpenAiAdapter {
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
            "Generating with OpenAI"
        );

        let start_time = Instant::now();
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, service))?;

        if !response.status().is_success() {
            return Err(classify_failed_response(response, service).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, service))?;
        let elapsed = start_time.elapsed();

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            DispatchError::invalid_response(service, format!("malformed response body: {}", e))
        })?;

        let choice = parsed.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DispatchError::invalid_response(service, "response contained no content"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::with_reported_total(u.prompt_tokens, u.completion_tokens, u.total_tokens))
            .unwrap_or_default();

        debug!(service, latency_ms = elapsed.as_millis() as u64, "OpenAI response received");

        Ok(ResponseEnvelope::new(
            content,
            service,
            parsed.model.unwrap_or_else(|| self.identity.default_model.clone()),
        )
        .with_usage(usage)
        .with_latency(elapsed)
        .with_metadata("finish_reason", finish_reason)
        .with_metadata("response_id", parsed.id))
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::Message;
    use crate::config::AdapterKind;

    fn adapter() -> OpenAiAdapter {
        let config = ServiceConfig::new(AdapterKind::OpenAi)
            .with_api_key("sk-test")
            .with_api_base("http://localhost:9999/v1/");
        OpenAiAdapter::new("openai", &config).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let request = GenerationRequest::new(vec![
            Message::system("be terse"),
            Message::user("hi"),
        ])
        .with_max_tokens(32)
        .with_structured_output(true);

        let body = serde_json::to_value(adapter().build_request(&request)).unwrap();
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 32);
        assert_eq!(body["response_format"]["type"], "json_object");

        let plain = serde_json::to_value(adapter().build_request(&GenerationRequest::from_prompt("x")))
            .unwrap();
        assert!(plain.get("response_format").is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(adapter().api_base, "http://localhost:9999/v1");
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", adapter());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-test"));
    }

    #[test]
    fn test_usage_parsing() {
        let body = r#"{"id":"r1","choices":[{"message":{"content":"hi"},"finish_reason":"stop"}],
            "usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.total_tokens, Some(10));
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}

//! Generation Service Abstraction
//!
//! Defines the `ServiceAdapter` trait that every backend implements, plus the
//! request/response types shared by all of them. Adapters return
//! `ResponseEnvelope` on success and a classified `DispatchError` on failure;
//! they never retry on their own.
//!
//! ## Modules
//!
//! - `dispatcher`: candidate ordering, retry with backoff, fallback
//! - `health`: TTL-cached health probes per service

mod anthropic;
mod dispatcher;
mod health;
mod ollama;
mod openai;

#[cfg(test)]
pub(crate) mod mock;

pub use anthropic::AnthropicAdapter;
pub use dispatcher::{
    DispatchConfig, DispatchOptions, Dispatcher, DispatcherBuilder, ServiceSelector,
};
pub use health::{HealthMonitor, HealthState, HealthStatus};
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AdapterKind, ServiceConfig};
use crate::constants::{health as health_constants, request as request_constants};
use crate::types::{DispatchError, ErrorClassifier, RelayError, Result};

// =============================================================================
// Request
// =============================================================================

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A generation request
///
/// Message order is preserved exactly as given. The request is immutable once
/// built; adapters only ever borrow it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    structured_output: bool,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: request_constants::DEFAULT_TEMPERATURE,
            max_tokens: request_constants::DEFAULT_MAX_TOKENS,
            structured_output: false,
        }
    }

    /// Single user message with default parameters
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    /// Minimal request used by health probes
    pub fn probe() -> Self {
        Self::from_prompt(health_constants::PROBE_PROMPT)
            .with_temperature(0.0)
            .with_max_tokens(health_constants::PROBE_MAX_TOKENS)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_structured_output(mut self, structured: bool) -> Self {
        self.structured_output = structured;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn structured_output(&self) -> bool {
        self.structured_output
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Token counts reported by the backend (zero when unavailable)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Use the backend's total when it reports one
    pub fn with_reported_total(prompt_tokens: u32, completion_tokens: u32, total: Option<u32>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total.unwrap_or(prompt_tokens.saturating_add(completion_tokens)),
        }
    }
}

/// Normalized result of a successful generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// Generated text
    pub content: String,
    /// Name of the service that served the request
    pub service: String,
    /// Model that produced the content
    pub model: String,
    /// Token counts
    pub usage: TokenUsage,
    /// Wall-clock latency of the serving call
    pub latency_ms: u64,
    /// Always false here; callers may wrap the dispatcher with their own cache
    pub cached: bool,
    /// Adapter-specific extras (finish reason, response id, ...)
    pub metadata: BTreeMap<String, Value>,
}

impl ResponseEnvelope {
    pub fn new(
        content: impl Into<String>,
        service: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            service: service.into(),
            model: model.into(),
            usage: TokenUsage::default(),
            latency_ms: 0,
            cached: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    /// Attach a metadata entry; `None` values are skipped
    pub fn with_metadata(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(value) = value {
            self.metadata.insert(key.to_string(), value.into());
        }
        self
    }

    /// Defensively parse the content as JSON
    ///
    /// Backends that cannot guarantee structured output may wrap JSON in code
    /// fences or prose; this strips and repairs what it can.
    pub fn parse_structured(&self) -> std::result::Result<Value, DispatchError> {
        crate::ai::structured::parse_structured(&self.content)
            .map_err(|reason| DispatchError::invalid_response(&self.service, reason))
    }
}

// =============================================================================
// Service Adapter Trait
// =============================================================================

/// Immutable identity of one adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    /// Unique service key
    pub name: String,
    /// Model used when the request does not say otherwise
    pub default_model: String,
    /// Whether required credentials/endpoint are present
    pub configured: bool,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, default_model: impl Into<String>, configured: bool) -> Self {
        Self {
            name: name.into(),
            default_model: default_model.into(),
            configured,
        }
    }
}

/// Uniform capability contract for one generation backend
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Service identity (no side effects)
    fn identity(&self) -> &ServiceIdentity;

    /// Whether the backend can guarantee well-formed structured output
    fn supports_structured_output(&self) -> bool;

    /// Perform exactly one outbound generation call
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<ResponseEnvelope, DispatchError>;

    /// Low-cost probe mapped into a health status; never fails
    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let result = self.generate(&GenerationRequest::probe()).await;
        HealthStatus::from_probe(result.map(|_| ()), start.elapsed())
    }

    fn name(&self) -> &str {
        &self.identity().name
    }

    fn is_configured(&self) -> bool {
        self.identity().configured
    }
}

/// Shared adapter handle for concurrent dispatch
pub type SharedAdapter = Arc<dyn ServiceAdapter>;

/// Create a shared adapter from configuration
pub fn create_adapter(name: &str, config: &ServiceConfig) -> Result<SharedAdapter> {
    let adapter: SharedAdapter = match config.kind {
        AdapterKind::OpenAi => Arc::new(OpenAiAdapter::new(name, config)?),
        AdapterKind::Anthropic => Arc::new(AnthropicAdapter::new(name, config)?),
        AdapterKind::Ollama => Arc::new(OllamaAdapter::new(name, config)?),
    };
    Ok(adapter)
}

// =============================================================================
// Shared HTTP helpers
// =============================================================================

pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(RelayError::Http)
}

/// Resolve a configured key, falling back to the vendor's env var
pub(crate) fn resolve_api_key(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .filter(|key| !key.trim().is_empty())
}

/// Read a failed response and classify it by status
pub(crate) async fn classify_failed_response(
    response: reqwest::Response,
    service: &str,
) -> DispatchError {
    let status = response.status().as_u16();
    let retry_after = ErrorClassifier::parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    ErrorClassifier::classify_http_status(status, &body, service, retry_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    struct ProbeOnly {
        identity: ServiceIdentity,
        outcome: std::result::Result<(), ErrorKind>,
    }

    #[async_trait]
    impl ServiceAdapter for ProbeOnly {
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
            assert_eq!(request.max_tokens(), health_constants::PROBE_MAX_TOKENS);
            match self.outcome {
                Ok(()) => Ok(ResponseEnvelope::new("pong", self.name(), "m")),
                Err(kind) => Err(DispatchError::new(kind, self.name(), "probe failed")),
            }
        }
    }

    #[tokio::test]
    async fn test_default_health_check_maps_outcomes() {
        let ok = ProbeOnly {
            identity: ServiceIdentity::new("a", "m", true),
            outcome: Ok(()),
        };
        let status = ok.health_check().await;
        assert_eq!(status.state, HealthState::Healthy);
        assert!(status.latency_ms.is_some());

        let down = ProbeOnly {
            identity: ServiceIdentity::new("b", "m", true),
            outcome: Err(ErrorKind::ServerError),
        };
        let status = down.health_check().await;
        assert_eq!(status.state, HealthState::Unhealthy);
        assert!(status.error.as_deref().unwrap_or("").contains("probe failed"));
        assert!(status.latency_ms.is_some());

        let throttled = ProbeOnly {
            identity: ServiceIdentity::new("c", "m", true),
            outcome: Err(ErrorKind::RateLimited),
        };
        assert_eq!(throttled.health_check().await.state, HealthState::Degraded);
    }

    #[test]
    fn test_request_builder_preserves_order() {
        let request = GenerationRequest::new(vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("again"),
        ])
        .with_temperature(0.2)
        .with_max_tokens(64)
        .with_structured_output(true);

        let roles: Vec<Role> = request.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(request.max_tokens(), 64);
        assert!(request.structured_output());
    }

    #[test]
    fn test_token_usage_totals() {
        assert_eq!(TokenUsage::new(100, 50).total_tokens, 150);
        assert_eq!(
            TokenUsage::with_reported_total(100, 50, Some(160)).total_tokens,
            160
        );
        assert_eq!(TokenUsage::default().total_tokens, 0);
    }

    #[test]
    fn test_token_usage_saturates_on_huge_counts() {
        assert_eq!(TokenUsage::new(u32::MAX, 1).total_tokens, u32::MAX);
        assert_eq!(
            TokenUsage::with_reported_total(u32::MAX, u32::MAX, None).total_tokens,
            u32::MAX
        );
    }

    #[test]
    fn test_envelope_metadata_skips_none() {
        let envelope = ResponseEnvelope::new("x", "svc", "m")
            .with_metadata("finish_reason", Some("stop"))
            .with_metadata("response_id", None::<String>);
        assert_eq!(envelope.metadata.len(), 1);
        assert!(!envelope.cached);
    }

    #[test]
    fn test_parse_structured_reports_invalid_response() {
        let envelope = ResponseEnvelope::new("```json\n{\"a\": 1}\n```", "svc", "m");
        assert_eq!(envelope.parse_structured().unwrap()["a"], 1);

        let prose = ResponseEnvelope::new("no json here", "svc", "m");
        let err = prose.parse_structured().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
        assert_eq!(err.service, "svc");
    }

    #[test]
    fn test_create_adapter_by_kind() {
        let openai = create_adapter(
            "primary",
            &ServiceConfig::new(AdapterKind::OpenAi).with_api_key("sk-test"),
        )
        .unwrap();
        assert_eq!(openai.name(), "primary");
        assert!(openai.is_configured());
        assert!(openai.supports_structured_output());

        let anthropic = create_adapter(
            "claude",
            &ServiceConfig::new(AdapterKind::Anthropic).with_api_key("sk-ant"),
        )
        .unwrap();
        assert!(!anthropic.supports_structured_output());

        let ollama = create_adapter("local", &ServiceConfig::new(AdapterKind::Ollama)).unwrap();
        assert!(ollama.is_configured());
    }
}

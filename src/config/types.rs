//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Read once at startup; nothing here is hot-reloaded.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{dispatch as dispatch_constants, health as health_constants, network};
use crate::types::{RelayError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Dispatcher settings
    pub dispatch: DispatchSettings,

    /// Per-service adapter settings, keyed by service name
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert("openai".to_string(), ServiceConfig::new(AdapterKind::OpenAi));
        services.insert(
            "anthropic".to_string(),
            ServiceConfig::new(AdapterKind::Anthropic),
        );
        services.insert("ollama".to_string(), ServiceConfig::new(AdapterKind::Ollama));

        Self {
            version: "1.0".to_string(),
            dispatch: DispatchSettings::default(),
            services,
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `RelayError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        let dispatch = &self.dispatch;

        if dispatch.max_retries == 0 {
            return Err(RelayError::Config(
                "dispatch.max_retries must be greater than 0".to_string(),
            ));
        }

        if dispatch.health_ttl_secs == 0 {
            return Err(RelayError::Config(
                "dispatch.health_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if dispatch.request_timeout_secs == Some(0) {
            return Err(RelayError::Config(
                "dispatch.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if Duration::from_millis(dispatch.base_delay_ms) > Duration::from_secs(dispatch.max_delay_secs)
        {
            return Err(RelayError::Config(format!(
                "dispatch.base_delay_ms ({}ms) exceeds dispatch.max_delay_secs ({}s)",
                dispatch.base_delay_ms, dispatch.max_delay_secs
            )));
        }

        if !dispatch.is_auto() && !self.services.contains_key(&dispatch.primary) {
            return Err(RelayError::Config(format!(
                "dispatch.primary '{}' is not a configured service (known: {})",
                dispatch.primary,
                self.service_names().join(", ")
            )));
        }

        for name in &dispatch.fallback {
            if !self.services.contains_key(name) {
                return Err(RelayError::Config(format!(
                    "dispatch.fallback entry '{}' is not a configured service (known: {})",
                    name,
                    self.service_names().join(", ")
                )));
            }
        }

        for (name, service) in &self.services {
            if service.timeout_secs == 0 {
                return Err(RelayError::Config(format!(
                    "services.{}.timeout_secs must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }

    fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }
}

// =============================================================================
// Dispatch Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// "auto" or an explicit service name tried first on every call
    pub primary: String,

    /// Ordered fallback chain of service names
    pub fallback: Vec<String>,

    /// Attempts per service before moving down the chain
    pub max_retries: u32,

    /// Base backoff delay; attempt N waits base * 2^N
    pub base_delay_ms: u64,

    /// Cap on any single backoff wait
    pub max_delay_secs: u64,

    /// Add up to 25% random jitter to backoff waits
    pub jitter: bool,

    /// How long a cached health status is trusted
    pub health_ttl_secs: u64,

    /// Overall deadline applied when the caller supplies none
    pub request_timeout_secs: Option<u64>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            primary: dispatch_constants::AUTO.to_string(),
            fallback: vec![
                "openai".to_string(),
                "anthropic".to_string(),
                "ollama".to_string(),
            ],
            max_retries: dispatch_constants::DEFAULT_MAX_RETRIES,
            base_delay_ms: dispatch_constants::BASE_DELAY_MS,
            max_delay_secs: dispatch_constants::MAX_DELAY_SECS,
            jitter: false,
            health_ttl_secs: health_constants::DEFAULT_TTL_SECS,
            request_timeout_secs: None,
        }
    }
}

impl DispatchSettings {
    pub fn is_auto(&self) -> bool {
        self.primary.eq_ignore_ascii_case(dispatch_constants::AUTO)
    }
}

// =============================================================================
// Service Configuration
// =============================================================================

/// Backend protocol spoken by a service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// OpenAI-compatible chat completions
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages API
    Anthropic,
    /// Local Ollama server
    Ollama,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::OpenAi => write!(f, "openai"),
            AdapterKind::Anthropic => write!(f, "anthropic"),
            AdapterKind::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(AdapterKind::OpenAi),
            "anthropic" => Ok(AdapterKind::Anthropic),
            "ollama" => Ok(AdapterKind::Ollama),
            _ => Err(format!(
                "Unknown adapter kind: {}. Valid values: openai, anthropic, ollama",
                s
            )),
        }
    }
}

/// Connection settings for one service
///
/// Note: API keys are never serialized to output and are redacted in debug
/// output. Adapters convert the key to `SecretString` on construction.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Adapter protocol
    pub kind: AdapterKind,

    /// Default model (adapter default when unset)
    pub model: Option<String>,

    /// API key; falls back to the vendor's conventional env var
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Base endpoint (adapter default when unset)
    pub api_base: Option<String>,

    /// Per-request HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(AdapterKind::default())
    }
}

impl ServiceConfig {
    pub fn new(kind: AdapterKind) -> Self {
        Self {
            kind,
            model: None,
            api_key: None,
            api_base: None,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

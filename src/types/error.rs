//! Unified Error Type System
//!
//! Centralized error types for the dispatcher and its adapters.
//!
//! ## Error Kinds
//!
//! - **Authentication**: credentials rejected (never retried)
//! - **RateLimited**: backend throttling (retry after backoff)
//! - **Timeout**: connection or response timeout (retry)
//! - **InvalidResponse**: success status but unusable body (retry)
//! - **ServerError**: backend-reported 5xx (retry)
//! - **Unknown**: anything else (conservative retry)
//! - **Cancelled**: caller cancelled the dispatch (never retried)
//!
//! Adapters translate every backend signal into a [`DispatchError`]; the
//! dispatcher only ever inspects the kind and the `retryable` flag.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{dispatch as dispatch_constants, network as net_constants};

// =============================================================================
// Error Kinds
// =============================================================================

/// Canonical failure taxonomy shared by every adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials missing or rejected
    Authentication,
    /// Explicit rate-limit signal from the backend
    RateLimited,
    /// Connection or response timeout
    Timeout,
    /// Empty or unparsable body on a success status
    InvalidResponse,
    /// Backend-reported server failure
    ServerError,
    /// Unclassified failure
    Unknown,
    /// Caller cancelled the dispatch
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "AUTHENTICATION"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::InvalidResponse => write!(f, "INVALID_RESPONSE"),
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl ErrorKind {
    /// Whether the same service may be tried again after backoff
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Authentication | Self::Cancelled)
    }
}

// =============================================================================
// Dispatch Error
// =============================================================================

/// Normalized failure of a single adapter call, or of a whole dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Service that produced the error ("none" when no candidate existed)
    pub service: String,
    /// Human-readable detail
    pub message: String,
    /// Whether the dispatcher may retry the same service
    pub retryable: bool,
    /// Backend-supplied wait hint (rate limits only)
    pub retry_after: Option<Duration>,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.service, self.kind, self.message)
    }
}

impl std::error::Error for DispatchError {}

impl DispatchError {
    /// Create an error whose retryability follows its kind
    pub fn new(kind: ErrorKind, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            service: service.into(),
            message: message.into(),
            retryable: kind.is_retryable(),
            retry_after: None,
            status: None,
        }
    }

    pub fn authentication(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, service, message)
    }

    pub fn rate_limited(
        service: impl Into<String>,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let mut err = Self::new(ErrorKind::RateLimited, service, message);
        err.retry_after = retry_after;
        err
    }

    pub fn timeout(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, service, message)
    }

    pub fn invalid_response(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidResponse, service, message)
    }

    pub fn server_error(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, service, message)
    }

    pub fn unknown(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, service, message)
    }

    pub fn cancelled(service: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, service, "dispatch cancelled by caller")
    }

    /// Error returned when the candidate order is empty
    pub fn no_candidates() -> Self {
        Self::unknown(
            dispatch_constants::NO_SERVICE,
            "no configured service available for dispatch",
        )
        .non_retryable()
    }

    /// Mark a request-shape failure that must not be retried
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Translation of backend signals into the canonical taxonomy
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a non-success HTTP status
    pub fn classify_http_status(
        status: u16,
        body: &str,
        service: &str,
        retry_after: Option<Duration>,
    ) -> DispatchError {
        let message = format!("HTTP {}: {}", status, preview(body));

        let err = match status {
            401 | 403 => DispatchError::authentication(service, message),
            429 => {
                let wait = retry_after.or_else(|| parse_rate_limit_delay(body));
                DispatchError::rate_limited(service, message, wait)
            }
            408 | 504 => DispatchError::timeout(service, message),
            500..=599 => DispatchError::server_error(service, message),
            // Request-shape problems will fail identically on every retry
            400 | 404 | 413 | 422 => DispatchError::unknown(service, message).non_retryable(),
            _ => DispatchError::unknown(service, message),
        };

        err.with_status(status)
    }

    /// Classify a transport-level failure (no response received)
    pub fn classify_transport(err: &reqwest::Error, service: &str) -> DispatchError {
        if err.is_timeout() {
            DispatchError::timeout(service, format!("request timed out: {}", err))
        } else if err.is_decode() {
            DispatchError::invalid_response(service, format!("failed to decode body: {}", err))
        } else if err.is_connect() {
            DispatchError::unknown(service, format!("connection failed: {}", err))
        } else {
            DispatchError::unknown(service, format!("request failed: {}", err))
        }
    }

    /// Read a `retry-after` header expressed in seconds
    pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
        let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        let secs = raw.parse::<f64>().ok()?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            secs.min(net_constants::MAX_RETRY_AFTER_SECS as f64),
        ))
    }
}

/// Parse rate limit delay from error message
///
/// Extracts retry-after seconds from common rate limit error formats.
pub fn parse_rate_limit_delay(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let cap = net_constants::MAX_RETRY_AFTER_SECS;

    // "retry after N seconds" or "retry-after: N"
    if let Some(idx) = lower.find("retry") {
        let after_retry = &lower[idx..];
        for word in after_retry.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_ascii_digit());
            if let Ok(secs) = word.parse::<u64>() {
                return Some(Duration::from_secs(secs.min(cap)));
            }
        }
    }

    // "wait N seconds" or "in N seconds"
    for pattern in &["wait ", "in "] {
        if let Some(idx) = lower.find(pattern) {
            let after_pattern = &lower[idx + pattern.len()..];
            if let Some(word) = after_pattern.split_whitespace().next()
                && let Ok(secs) = word.parse::<u64>()
            {
                return Some(Duration::from_secs(secs.min(cap)));
            }
        }
    }

    None
}

fn preview(body: &str) -> String {
    const MAX_CHARS: usize = 500;
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_CHARS {
        format!("{}...", trimmed.chars().take(MAX_CHARS).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl RelayError {
    /// The underlying dispatch error, if this is one
    pub fn as_dispatch(&self) -> Option<&DispatchError> {
        match self {
            Self::Dispatch(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

// =============================================================================
// Tests
// =============================================================================

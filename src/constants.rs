//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Dispatcher constants
pub mod dispatch {
    /// Default attempts per service before moving down the chain
    pub const DEFAULT_MAX_RETRIES: u32 = 2;

    /// Base delay for exponential backoff (milliseconds); attempt N waits base * 2^N
    pub const BASE_DELAY_MS: u64 = 1_000;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// Upper bound on random jitter, as a fraction of the computed delay
    pub const JITTER_FRACTION: u64 = 4;

    /// Preference value meaning "no explicit preference"
    pub const AUTO: &str = "auto";

    /// Service name reported when no candidate could be selected
    pub const NO_SERVICE: &str = "none";
}

/// Health monitor constants
pub mod health {
    /// Cached health entries are trusted for this long (seconds)
    pub const DEFAULT_TTL_SECS: u64 = 300;

    /// Successful probes slower than this are reported as degraded (milliseconds)
    pub const DEGRADED_LATENCY_MS: u64 = 5_000;

    /// Token budget for the probe generation
    pub const PROBE_MAX_TOKENS: u32 = 1;

    /// Probe prompt
    pub const PROBE_PROMPT: &str = "ping";
}

/// Network constants
pub mod network {
    /// Default per-request HTTP timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Rate-limit hints parsed from response text are capped at this (seconds)
    pub const MAX_RETRY_AFTER_SECS: u64 = 300;
}

/// Request defaults
pub mod request {
    /// Default sampling temperature
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    /// Default maximum output tokens
    pub const DEFAULT_MAX_TOKENS: u32 = 1_024;
}

//! Multi-Service Dispatcher
//!
//! Routes one generation request across interchangeable services.
//!
//! ## Strategy
//!
//! 1. Build the candidate order: explicit preference first (if configured),
//!    then the configured fallback chain, deduplicated, in chain order
//! 2. Without an explicit preference, move the first healthy candidate to the
//!    front; health never removes a candidate
//! 3. Try each candidate up to `max_retries` times with exponential backoff
//!    (`base_delay * 2^attempt`); non-retryable errors advance immediately
//! 4. Return the first success, or the last error once every candidate is
//!    exhausted
//!
//! Every adapter call and every backoff sleep races the caller's cancellation
//! token and deadline.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::health::{HealthMonitor, HealthStatus};
use super::{
    GenerationRequest, ResponseEnvelope, ServiceAdapter, ServiceIdentity, SharedAdapter,
    create_adapter,
};
use crate::ai::timeout::{Deadline, Interrupted, guarded};
use crate::config::{Config, DispatchSettings};
use crate::constants::{dispatch as dispatch_constants, health as health_constants};
use crate::types::{DispatchError, Result};

/// Globally configured preference
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceSelector {
    /// Follow the fallback chain, reordered by health
    #[default]
    Auto,
    /// Always try this service first
    Named(String),
}

impl ServiceSelector {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(dispatch_constants::AUTO) {
            Self::Auto
        } else {
            Self::Named(trimmed.to_string())
        }
    }

    fn as_preference(&self) -> Option<&str> {
        match self {
            Self::Auto => None,
            Self::Named(name) => Some(name),
        }
    }
}

/// Dispatcher configuration (read-only after construction)
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Global preference
    pub primary: ServiceSelector,
    /// Ordered fallback chain of service names
    pub fallback_chain: Vec<String>,
    /// Attempts per service
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Add random jitter to backoff waits
    pub jitter: bool,
    /// Health cache TTL
    pub health_ttl: Duration,
    /// Deadline applied when the caller supplies none
    pub request_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            primary: ServiceSelector::Auto,
            fallback_chain: Vec::new(),
            max_retries: dispatch_constants::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(dispatch_constants::BASE_DELAY_MS),
            max_delay: Duration::from_secs(dispatch_constants::MAX_DELAY_SECS),
            jitter: false,
            health_ttl: Duration::from_secs(health_constants::DEFAULT_TTL_SECS),
            request_timeout: None,
        }
    }
}

impl From<&DispatchSettings> for DispatchConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            primary: ServiceSelector::parse(&settings.primary),
            fallback_chain: settings.fallback.clone(),
            max_retries: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_secs(settings.max_delay_secs),
            jitter: settings.jitter,
            health_ttl: Duration::from_secs(settings.health_ttl_secs),
            request_timeout: settings.request_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Service to try first ("auto" or `None` means no preference)
    pub preference: Option<String>,
    /// Overall deadline for the whole dispatch
    pub deadline: Option<Instant>,
    /// Caller cancellation signal
    pub cancel: Option<CancellationToken>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefer(mut self, service: impl Into<String>) -> Self {
        self.preference = Some(service.into());
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Multi-service dispatcher with health-aware ordering and bounded retry
///
/// Safe to share across tasks; the only mutable shared state is the health
/// cache inside [`HealthMonitor`].
pub struct Dispatcher {
    adapters: HashMap<String, SharedAdapter>,
    health: Arc<HealthMonitor>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Build adapters for every configured service
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder().with_config(DispatchConfig::from(&config.dispatch));
        for (name, service) in &config.services {
            builder = builder.add_shared(create_adapter(name, service)?);
        }
        Ok(builder.build())
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    /// Identities of every registered service, sorted by name
    pub fn services(&self) -> Vec<&ServiceIdentity> {
        let mut identities: Vec<&ServiceIdentity> =
            self.adapters.values().map(|a| a.identity()).collect();
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        identities
    }

    pub async fn health(&self, service: &str) -> HealthStatus {
        self.health.get_health(service).await
    }

    pub async fn all_health(&self) -> BTreeMap<String, HealthStatus> {
        self.health.get_all_health().await
    }

    /// Effective explicit preference: per-call wins over the global selector
    fn explicit_preference<'a>(&'a self, preference: Option<&'a str>) -> Option<&'a str> {
        preference
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case(dispatch_constants::AUTO))
            .or_else(|| self.config.primary.as_preference())
    }

    fn is_usable(&self, service: &str) -> bool {
        self.adapters
            .get(service)
            .is_some_and(|adapter| adapter.is_configured())
    }

    /// Candidate order from configuration alone (no health information)
    pub fn candidate_order(&self, preference: Option<&str>) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();

        if let Some(preferred) = self.explicit_preference(preference) {
            if self.is_usable(preferred) {
                order.push(preferred.to_string());
            } else {
                debug!(service = preferred, "Preferred service unavailable, ignoring preference");
            }
        }

        for name in &self.config.fallback_chain {
            if !self.adapters.contains_key(name) {
                debug!(service = %name, "Fallback entry has no registered adapter, skipping");
                continue;
            }
            if self.is_usable(name) && !order.contains(name) {
                order.push(name.clone());
            }
        }

        order
    }

    /// Candidate order with the health hint applied
    ///
    /// When no explicit preference placed a service first, the first
    /// candidate reporting healthy moves to the front. Candidates are probed
    /// lazily, in order, and probing stops at the first healthy one.
    pub async fn select_order(&self, preference: Option<&str>) -> Vec<String> {
        let mut order = self.candidate_order(preference);

        let preferred_first = self
            .explicit_preference(preference)
            .is_some_and(|p| order.first().map(String::as_str) == Some(p));
        if preferred_first {
            return order;
        }

        let mut healthy_at = None;
        for (idx, name) in order.iter().enumerate() {
            if self.health.get_health(name).await.is_healthy() {
                healthy_at = Some(idx);
                break;
            }
        }

        match healthy_at {
            Some(idx) if idx > 0 => {
                let service = order.remove(idx);
                debug!(service = %service, "Promoting first healthy candidate");
                order.insert(0, service);
            }
            Some(_) => {}
            None => debug!("No healthy candidate, keeping chain order"),
        }

        order
    }

    /// Dispatch with an optional per-call preference
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        preference: Option<&str>,
    ) -> std::result::Result<ResponseEnvelope, DispatchError> {
        let mut options = DispatchOptions::new();
        options.preference = preference.map(str::to_string);
        self.generate_with(request, options).await
    }

    /// Dispatch with full per-call options
    #[instrument(
        skip_all,
        fields(
            request_id = %Uuid::new_v4(),
            preference = options.preference.as_deref().unwrap_or(dispatch_constants::AUTO),
        )
    )]
    pub async fn generate_with(
        &self,
        request: &GenerationRequest,
        options: DispatchOptions,
    ) -> std::result::Result<ResponseEnvelope, DispatchError> {
        let start_time = Instant::now();
        let deadline = Deadline::from_option(
            options
                .deadline
                .or_else(|| self.config.request_timeout.map(|t| start_time + t)),
        );
        let cancel = options.cancel.unwrap_or_default();
        let none = dispatch_constants::NO_SERVICE;

        let order = match guarded(
            self.select_order(options.preference.as_deref()),
            &cancel,
            deadline,
        )
        .await
        {
            Ok(order) => order,
            Err(Interrupted::Cancelled) => return Err(DispatchError::cancelled(none)),
            Err(Interrupted::DeadlineElapsed) => {
                return Err(DispatchError::timeout(
                    none,
                    "deadline elapsed during service selection",
                ));
            }
        };

        if order.is_empty() {
            warn!("No configured service available");
            return Err(DispatchError::no_candidates());
        }

        debug!(candidates = ?order, "Candidate order");

        let max_retries = self.config.max_retries.max(1);
        let mut last_error: Option<DispatchError> = None;
        let mut total_attempts = 0u32;

        for (position, service) in order.iter().enumerate() {
            let Some(adapter) = self.adapters.get(service) else {
                continue;
            };

            for attempt in 0..max_retries {
                if deadline.is_expired() {
                    warn!(service = %service, "Deadline reached, no further attempts");
                    return Err(last_error.unwrap_or_else(|| {
                        DispatchError::timeout(service.as_str(), "deadline elapsed before attempt")
                    }));
                }

                total_attempts += 1;
                debug!(
                    service = %service,
                    attempt = attempt + 1,
                    max_retries,
                    total_attempts,
                    "Dispatch attempt"
                );

                let attempt_start = Instant::now();
                let outcome = match guarded(adapter.generate(request), &cancel, deadline).await {
                    Ok(outcome) => outcome,
                    Err(Interrupted::Cancelled) => {
                        warn!(service = %service, "Dispatch cancelled mid-call");
                        return Err(DispatchError::cancelled(service.as_str()));
                    }
                    Err(Interrupted::DeadlineElapsed) => {
                        warn!(service = %service, "Deadline elapsed mid-call");
                        return Err(DispatchError::timeout(
                            service.as_str(),
                            format!(
                                "deadline elapsed after {}ms",
                                attempt_start.elapsed().as_millis()
                            ),
                        ));
                    }
                };

                let err = match outcome {
                    Ok(envelope) => {
                        info!(
                            service = %envelope.service,
                            model = %envelope.model,
                            attempts = total_attempts,
                            latency_ms = envelope.latency_ms,
                            total_ms = start_time.elapsed().as_millis() as u64,
                            "Dispatch succeeded"
                        );
                        return Ok(envelope);
                    }
                    Err(err) => err,
                };

                warn!(
                    service = %service,
                    attempt = attempt + 1,
                    kind = %err.kind,
                    retryable = err.retryable,
                    error = %err.message,
                    "Service attempt failed"
                );

                let retryable = err.retryable;
                let retry_hint = err.retry_after;
                last_error = Some(err);

                if !retryable {
                    info!(service = %service, "Non-retryable failure, advancing to next service");
                    break;
                }
                if attempt + 1 >= max_retries {
                    break;
                }

                let delay = self.backoff_delay(attempt, retry_hint);
                if !deadline.admits(delay) {
                    warn!(
                        service = %service,
                        delay_ms = delay.as_millis() as u64,
                        "Backoff would pass the deadline, stopping"
                    );
                    return Err(last_error.unwrap_or_else(DispatchError::no_candidates));
                }

                debug!(service = %service, delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                match guarded(tokio::time::sleep(delay), &cancel, deadline).await {
                    Ok(()) => {}
                    Err(Interrupted::Cancelled) => {
                        warn!(service = %service, "Dispatch cancelled during backoff");
                        return Err(DispatchError::cancelled(service.as_str()));
                    }
                    Err(Interrupted::DeadlineElapsed) => {
                        return Err(last_error.unwrap_or_else(DispatchError::no_candidates));
                    }
                }
            }

            if let Some(next) = order.get(position + 1) {
                info!(from = %service, to = %next, "Falling back to next service");
            }
        }

        warn!(
            attempts = total_attempts,
            total_ms = start_time.elapsed().as_millis() as u64,
            "All services exhausted"
        );
        Err(last_error.unwrap_or_else(DispatchError::no_candidates))
    }

    /// Backoff before retry `attempt + 1` of the same service
    fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .config
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let delay = exponential
            .max(retry_after.unwrap_or(Duration::ZERO))
            .min(self.config.max_delay);

        if self.config.jitter {
            delay + random_jitter(delay)
        } else {
            delay
        }
    }
}

/// Generate random jitter using thread-local RNG for efficiency
fn random_jitter(base_delay: Duration) -> Duration {
    let max_jitter_ms = (base_delay.as_millis() as u64) / dispatch_constants::JITTER_FRACTION;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    let jitter_ms = rand::rng().random_range(0..max_jitter_ms);
    Duration::from_millis(jitter_ms)
}

/// Builder for creating dispatchers
pub struct DispatcherBuilder {
    adapters: HashMap<String, SharedAdapter>,
    insertion_order: Vec<String>,
    config: DispatchConfig,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            insertion_order: Vec::new(),
            config: DispatchConfig::default(),
        }
    }

    /// Register an adapter under its identity name
    pub fn add_adapter(self, adapter: impl ServiceAdapter + 'static) -> Self {
        self.add_shared(Arc::new(adapter))
    }

    /// Register a shared adapter; a later adapter with the same name replaces it
    pub fn add_shared(mut self, adapter: SharedAdapter) -> Self {
        let name = adapter.name().to_string();
        if !self.insertion_order.contains(&name) {
            self.insertion_order.push(name.clone());
        }
        self.adapters.insert(name, adapter);
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fallback_chain<I, S>(mut self, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fallback_chain = chain.into_iter().map(Into::into).collect();
        self
    }

    pub fn primary(mut self, selector: ServiceSelector) -> Self {
        self.config.primary = selector;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn health_ttl(mut self, ttl: Duration) -> Self {
        self.config.health_ttl = ttl;
        self
    }

    /// Deadline applied to calls that carry none of their own
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Build the dispatcher; an empty fallback chain defaults to registration order
    pub fn build(mut self) -> Dispatcher {
        if self.config.fallback_chain.is_empty() {
            self.config.fallback_chain = self.insertion_order.clone();
        }

        for name in &self.config.fallback_chain {
            if !self.adapters.contains_key(name) {
                warn!(service = %name, "Fallback entry has no registered adapter, it will be skipped");
            }
        }

        let configured = self
            .adapters
            .values()
            .filter(|adapter| adapter.is_configured())
            .count();
        info!(
            services = self.adapters.len(),
            configured,
            chain = ?self.config.fallback_chain,
            "Dispatcher ready"
        );

        let health = Arc::new(HealthMonitor::new(
            self.adapters.clone(),
            self.config.health_ttl,
        ));

        Dispatcher {
            adapters: self.adapters,
            health,
            config: self.config,
        }
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

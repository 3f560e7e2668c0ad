//! Service Health Monitor
//!
//! Answers "is this service currently usable?" without probing on every
//! dispatch. Each service has its own cache slot guarded by an async mutex:
//!
//! - a fresh entry (younger than the TTL) is returned unchanged
//! - an expired or missing entry is refreshed by one probe, then returned
//! - callers racing on the same slot wait for the in-flight probe instead of
//!   issuing their own; different services never block each other
//!
//! Unconfigured services are reported unhealthy without a probe.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::SharedAdapter;
use crate::constants::health as health_constants;
use crate::types::{DispatchError, ErrorKind};

/// Coarse health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of one health probe; superseded, never mutated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    fn with_state(state: HealthState, latency_ms: Option<u64>, error: Option<String>) -> Self {
        Self {
            state,
            latency_ms,
            error,
            checked_at: Utc::now(),
        }
    }

    pub fn healthy(latency: Duration) -> Self {
        Self::with_state(HealthState::Healthy, Some(latency.as_millis() as u64), None)
    }

    pub fn degraded(latency: Duration, reason: Option<String>) -> Self {
        Self::with_state(
            HealthState::Degraded,
            Some(latency.as_millis() as u64),
            reason,
        )
    }

    pub fn unhealthy(error: impl Into<String>, latency: Option<Duration>) -> Self {
        Self::with_state(
            HealthState::Unhealthy,
            latency.map(|l| l.as_millis() as u64),
            Some(error.into()),
        )
    }

    pub fn unknown() -> Self {
        Self::with_state(HealthState::Unknown, None, None)
    }

    /// Map a probe outcome and its measured latency
    pub fn from_probe(result: Result<(), DispatchError>, latency: Duration) -> Self {
        match result {
            Ok(()) if latency.as_millis() as u64 > health_constants::DEGRADED_LATENCY_MS => {
                Self::degraded(
                    latency,
                    Some(format!("slow probe: {}ms", latency.as_millis())),
                )
            }
            Ok(()) => Self::healthy(latency),
            // Reachable but throttled
            Err(err) if err.kind == ErrorKind::RateLimited => {
                Self::degraded(latency, Some(err.to_string()))
            }
            Err(err) => Self::unhealthy(err.to_string(), Some(latency)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }
}

struct CachedHealth {
    status: HealthStatus,
    refreshed_at: Instant,
}

type HealthSlot = Mutex<Option<CachedHealth>>;

/// TTL cache of per-service health
pub struct HealthMonitor {
    adapters: HashMap<String, SharedAdapter>,
    slots: HashMap<String, HealthSlot>,
    ttl: Duration,
}

impl HealthMonitor {
    pub fn new(adapters: HashMap<String, SharedAdapter>, ttl: Duration) -> Self {
        let slots = adapters
            .keys()
            .map(|name| (name.clone(), HealthSlot::default()))
            .collect();

        Self {
            adapters,
            slots,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current health of one service, probing only if the cache is stale
    pub async fn get_health(&self, service: &str) -> HealthStatus {
        let Some(adapter) = self.adapters.get(service) else {
            return HealthStatus::unhealthy(format!("unknown service '{}'", service), None);
        };

        if !adapter.is_configured() {
            return HealthStatus::unhealthy(
                format!(
                    "service '{}' is not configured (missing credentials or endpoint)",
                    service
                ),
                None,
            );
        }

        let Some(slot) = self.slots.get(service) else {
            return HealthStatus::unknown();
        };

        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref()
            && cached.refreshed_at.elapsed() < self.ttl
        {
            debug!(service, state = %cached.status.state, "Health cache hit");
            return cached.status.clone();
        }

        debug!(service, "Health cache miss, probing");
        let status = adapter.health_check().await;
        if !status.is_healthy() {
            warn!(
                service,
                state = %status.state,
                error = status.error.as_deref().unwrap_or(""),
                "Service health probe not healthy"
            );
        }

        *entry = Some(CachedHealth {
            status: status.clone(),
            refreshed_at: Instant::now(),
        });
        status
    }

    /// Health of every known service (diagnostics only)
    pub async fn get_all_health(&self) -> BTreeMap<String, HealthStatus> {
        let names: Vec<&String> = self.adapters.keys().collect();
        let statuses = join_all(names.iter().map(|name| self.get_health(name))).await;

        names
            .into_iter()
            .cloned()
            .zip(statuses)
            .collect()
    }

    /// Cached status without probing; `None` if never probed or expired
    pub async fn cached(&self, service: &str) -> Option<HealthStatus> {
        let slot = self.slots.get(service)?;
        let entry = slot.lock().await;
        entry
            .as_ref()
            .filter(|cached| cached.refreshed_at.elapsed() < self.ttl)
            .map(|cached| cached.status.clone())
    }

    /// Drop a cached entry so the next lookup probes again
    pub async fn invalidate(&self, service: &str) {
        if let Some(slot) = self.slots.get(service) {
            *slot.lock().await = None;
        }
    }
}

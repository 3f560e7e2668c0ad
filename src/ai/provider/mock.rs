//! Scripted adapter for dispatcher, health and usage tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    GenerationRequest, HealthState, HealthStatus, ResponseEnvelope, ServiceAdapter,
    ServiceIdentity, TokenUsage,
};
use crate::types::{DispatchError, ErrorKind};

/// Outcome of one scripted call
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Ok(String),
    Err(ErrorKind),
    RateLimited(Duration),
    /// Never completes on its own within any sane test deadline
    Hang,
}

/// Shared record of which service was called, in order
pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

pub(crate) struct ScriptedAdapter {
    identity: ServiceIdentity,
    script: Mutex<VecDeque<Outcome>>,
    repeat: Outcome,
    calls: AtomicU32,
    probes: AtomicU32,
    health: HealthState,
    probe_delay: Duration,
    log: Option<CallLog>,
}

impl ScriptedAdapter {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            identity: ServiceIdentity::new(name, "mock-model", true),
            script: Mutex::new(VecDeque::new()),
            repeat: Outcome::Ok("ok".to_string()),
            calls: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            health: HealthState::Healthy,
            probe_delay: Duration::ZERO,
            log: None,
        }
    }

    pub(crate) fn unconfigured(mut self) -> Self {
        self.identity.configured = false;
        self
    }

    /// Queue one outcome; queued outcomes are consumed before `always`
    pub(crate) fn then(self, outcome: Outcome) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
        self
    }

    /// Outcome used once the queue is empty
    pub(crate) fn always(mut self, outcome: Outcome) -> Self {
        self.repeat = outcome;
        self
    }

    pub(crate) fn with_health(mut self, state: HealthState) -> Self {
        self.health = state;
        self
    }

    pub(crate) fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub(crate) fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.repeat.clone())
    }
}

#[async_trait]
impl ServiceAdapter for ScriptedAdapter {
    fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<ResponseEnvelope, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log
            && let Ok(mut log) = log.lock()
        {
            log.push(self.identity.name.clone());
        }

        let name = self.identity.name.as_str();
        match self.next_outcome() {
            Outcome::Ok(content) => Ok(ResponseEnvelope::new(content, name, "mock-model")
                .with_usage(TokenUsage::new(10, 5))
                .with_latency(Duration::from_millis(42))
                .with_metadata("finish_reason", Some("stop"))),
            Outcome::Err(kind) => Err(DispatchError::new(
                kind,
                name,
                format!("scripted {} failure", kind),
            )),
            Outcome::RateLimited(wait) => Err(DispatchError::rate_limited(
                name,
                "scripted rate limit",
                Some(wait),
            )),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(ResponseEnvelope::new("late", name, "mock-model"))
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }

        match self.health {
            HealthState::Healthy => HealthStatus::healthy(self.probe_delay),
            HealthState::Degraded => HealthStatus::degraded(self.probe_delay, None),
            HealthState::Unhealthy => {
                HealthStatus::unhealthy("scripted outage", Some(self.probe_delay))
            }
            HealthState::Unknown => HealthStatus::unknown(),
        }
    }
}

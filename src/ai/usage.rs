//! Usage Tracking
//!
//! Thin wrapper around the dispatcher that pairs each successful response with
//! a flat `UsageSummary` for telemetry, and keeps per-service aggregate
//! counters. Thread-safe for concurrent dispatch.
//!
//! ## Usage
//!
//! ```ignore
//! let tracker = UsageTracker::new(Arc::new(dispatcher));
//! let (envelope, usage) = tracker.generate_with_tracking(&request, None).await?;
//! println!("{}", tracker.stats().display());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::ai::provider::{DispatchOptions, Dispatcher, GenerationRequest, ResponseEnvelope};
use crate::types::DispatchError;

/// Flat projection of a successful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub service: String,
    pub model: String,
    pub latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<&ResponseEnvelope> for UsageSummary {
    fn from(envelope: &ResponseEnvelope) -> Self {
        Self {
            service: envelope.service.clone(),
            model: envelope.model.clone(),
            latency_ms: envelope.latency_ms,
            prompt_tokens: envelope.usage.prompt_tokens,
            completion_tokens: envelope.usage.completion_tokens,
            total_tokens: envelope.usage.total_tokens,
        }
    }
}

/// Lock-free counters for one service
#[derive(Default)]
struct ServiceCounters {
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    latency_ms: AtomicU64,
}

/// Aggregated usage for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceUsage {
    pub service: String,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
}

/// Snapshot of all counters, sorted by service name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub services: Vec<ServiceUsage>,
}

impl UsageStats {
    pub fn total_calls(&self) -> u64 {
        self.services.iter().map(|s| s.calls).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.services.iter().map(|s| s.total_tokens).sum()
    }

    /// Format for display
    pub fn display(&self) -> String {
        let mut lines = vec![format!(
            "Calls: {}  Tokens: {}",
            self.total_calls(),
            self.total_tokens()
        )];
        for s in &self.services {
            lines.push(format!(
                "  {}: {} calls, {} tokens (prompt: {}, completion: {}), avg {:.0}ms",
                s.service,
                s.calls,
                s.total_tokens,
                s.prompt_tokens,
                s.completion_tokens,
                s.avg_latency_ms
            ));
        }
        lines.join("\n")
    }
}

/// Dispatcher wrapper that records usage of successful calls
pub struct UsageTracker {
    dispatcher: Arc<Dispatcher>,
    counters: DashMap<String, ServiceCounters>,
}

impl UsageTracker {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            counters: DashMap::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Dispatch and project usage; failures pass through untouched and are not counted
    pub async fn generate_with_tracking(
        &self,
        request: &GenerationRequest,
        preference: Option<&str>,
    ) -> Result<(ResponseEnvelope, UsageSummary), DispatchError> {
        let mut options = DispatchOptions::new();
        options.preference = preference.map(str::to_string);
        self.generate_with_options(request, options).await
    }

    pub async fn generate_with_options(
        &self,
        request: &GenerationRequest,
        options: DispatchOptions,
    ) -> Result<(ResponseEnvelope, UsageSummary), DispatchError> {
        let envelope = self.dispatcher.generate_with(request, options).await?;
        let summary = UsageSummary::from(&envelope);
        self.record(&summary);
        Ok((envelope, summary))
    }

    fn record(&self, summary: &UsageSummary) {
        let counters = self.counters.entry(summary.service.clone()).or_default();
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters
            .prompt_tokens
            .fetch_add(summary.prompt_tokens as u64, Ordering::Relaxed);
        counters
            .completion_tokens
            .fetch_add(summary.completion_tokens as u64, Ordering::Relaxed);
        counters
            .latency_ms
            .fetch_add(summary.latency_ms, Ordering::Relaxed);
    }

    pub fn stats(&self) -> UsageStats {
        let mut services: Vec<ServiceUsage> = self
            .counters
            .iter()
            .map(|entry| {
                let c = entry.value();
                let calls = c.calls.load(Ordering::Relaxed);
                let prompt_tokens = c.prompt_tokens.load(Ordering::Relaxed);
                let completion_tokens = c.completion_tokens.load(Ordering::Relaxed);
                let latency = c.latency_ms.load(Ordering::Relaxed);
                ServiceUsage {
                    service: entry.key().clone(),
                    calls,
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                    avg_latency_ms: if calls > 0 {
                        latency as f64 / calls as f64
                    } else {
                        0.0
                    },
                }
            })
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));
        UsageStats { services }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::mock::{Outcome, ScriptedAdapter};
    use crate::types::ErrorKind;

    fn tracker(adapters: Vec<ScriptedAdapter>) -> UsageTracker {
        let mut builder = Dispatcher::builder();
        for adapter in adapters {
            builder = builder.add_adapter(adapter);
        }
        UsageTracker::new(Arc::new(builder.build()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_projects_envelope() {
        let tracker = tracker(vec![ScriptedAdapter::new("a")]);
        let (envelope, usage) = tracker
            .generate_with_tracking(&GenerationRequest::from_prompt("hi"), None)
            .await
            .unwrap();

        assert_eq!(usage.service, envelope.service);
        assert_eq!(usage.model, "mock-model");
        assert_eq!(usage.latency_ms, 42);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_not_counted() {
        let tracker = tracker(vec![
            ScriptedAdapter::new("a").always(Outcome::Err(ErrorKind::Authentication)),
        ]);

        let err = tracker
            .generate_with_tracking(&GenerationRequest::from_prompt("hi"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(tracker.stats().total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_aggregate_per_service() {
        let tracker = tracker(vec![ScriptedAdapter::new("a"), ScriptedAdapter::new("b")]);
        let request = GenerationRequest::from_prompt("hi");

        for _ in 0..3 {
            tracker.generate_with_tracking(&request, None).await.unwrap();
        }
        tracker.generate_with_tracking(&request, Some("b")).await.unwrap();

        let stats = tracker.stats();
        assert_eq!(stats.services.len(), 2);
        assert_eq!(stats.services[0].service, "a");
        assert_eq!(stats.services[0].calls, 3);
        assert_eq!(stats.services[0].total_tokens, 45);
        assert_eq!(stats.services[1].calls, 1);
        assert_eq!(stats.total_tokens(), 60);
        assert!((stats.services[0].avg_latency_ms - 42.0).abs() < f64::EPSILON);

        let display = stats.display();
        assert!(display.contains("Calls: 4"));
        assert!(display.contains("a: 3 calls"));
    }
}

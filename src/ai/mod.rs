//! Generation Layer
//!
//! Multi-backend text generation: adapters, health-aware dispatch, and the
//! helpers callers use around it.

pub mod provider;
pub mod structured;
pub mod timeout;
pub mod usage;

pub use provider::{
    AnthropicAdapter, DispatchConfig, DispatchOptions, Dispatcher, DispatcherBuilder,
    GenerationRequest, HealthMonitor, HealthState, HealthStatus, Message, OllamaAdapter,
    OpenAiAdapter, ResponseEnvelope, Role, ServiceAdapter, ServiceIdentity, ServiceSelector,
    SharedAdapter, TokenUsage, create_adapter,
};
pub use structured::{JsonRepairer, Repair, parse_structured};
pub use timeout::{Deadline, Interrupted, guarded};
pub use usage::{ServiceUsage, UsageStats, UsageSummary, UsageTracker};

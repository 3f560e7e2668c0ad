//! genrelay - Multi-Backend Text Generation Dispatcher
//!
//! Sends one generation request to whichever of several interchangeable
//! backends can serve it, with per-service retry, ordered fallback and
//! cached health hints.
//!
//! ## Core Features
//!
//! - **Service Adapters**: OpenAI-compatible, Anthropic and Ollama backends
//!   behind one `ServiceAdapter` trait, with a canonical error taxonomy
//! - **Health Monitor**: TTL-cached probes, one in flight per service
//! - **Dispatcher**: preference-first ordering, exponential backoff, deadline
//!   and cancellation support
//! - **Usage Tracking**: flat per-call usage summaries and aggregates
//!
//! ## Quick Start
//!
//! ```ignore
//! use genrelay::{ConfigLoader, Dispatcher, GenerationRequest};
//!
//! let config = ConfigLoader::load()?;
//! let dispatcher = Dispatcher::from_config(&config)?;
//! let envelope = dispatcher
//!     .generate(&GenerationRequest::from_prompt("Hello"), None)
//!     .await?;
//! println!("{} answered: {}", envelope.service, envelope.content);
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: adapters, health monitor, dispatcher, usage tracking
//! - [`config`]: layered configuration (defaults, files, env)
//! - [`types`]: error taxonomy

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod types;

// Configuration
pub use config::{AdapterKind, Config, ConfigLoader, DispatchSettings, ServiceConfig};

// Error Types
pub use types::{DispatchError, ErrorClassifier, ErrorKind, RelayError, Result};

// Generation
pub use ai::{
    DispatchConfig, DispatchOptions, Dispatcher, DispatcherBuilder, GenerationRequest,
    HealthMonitor, HealthState, HealthStatus, Message, ResponseEnvelope, Role, ServiceAdapter,
    ServiceIdentity, ServiceSelector, TokenUsage, UsageSummary, UsageTracker,
};

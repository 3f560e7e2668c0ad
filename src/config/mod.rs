//! Configuration Management
//!
//! Hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/genrelay/config.toml)
//! 3. Project config (./genrelay.toml)
//! 4. Environment variables (GENRELAY_*)

mod loader;
mod types;

pub use loader::{ConfigLoader, ENV_PREFIX};
pub use types::*;

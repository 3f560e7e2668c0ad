//! Config Command
//!
//! Usage:
//!   genrelay config show [-f toml|json]
//!   genrelay config path

use crate::cli::is_json;
use crate::config::{Config, ConfigLoader};
use crate::types::Result;

/// Print the effective (merged) configuration; API keys are never included
pub fn show(config: &Config, format: &str) -> Result<()> {
    println!("{}", ConfigLoader::render(config, is_json(format))?);
    Ok(())
}

/// Show configuration paths
pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

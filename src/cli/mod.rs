pub mod commands;
pub mod ui;

use std::path::Path;

use crate::config::{Config, ConfigLoader};
use crate::types::Result;

/// Load the explicit config file if given, otherwise the layered defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Parse an output format flag
pub(crate) fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}

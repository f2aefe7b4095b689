//! Configuration module for srcpipe
//!
//! Provides types and parsing for `srcpipe.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::{
    check, default_config, find_config, find_config_from, load_config, merge_cli_overrides,
    resolve_path, CliOverrides, ConfigError, CONFIG_FILENAME,
};
pub use schema::*;

//! Parsing and validation of `kiln.toml` engine configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`EngineConfig`] covering the cache budgets, scheduler bounds, change
//! debouncing, and the transform options that feed every module's config hash.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, validate_config, CONFIG_FILE};
pub use types::*;

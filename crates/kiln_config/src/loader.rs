//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::EngineConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a project directory.
///
/// A project without a `kiln.toml` gets the default configuration.
pub fn load_config(project_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that budgets and bounds are usable.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.cache.max_entries == 0 {
        return Err(ConfigError::ValidationError(
            "cache.max_entries must be at least 1".to_string(),
        ));
    }
    if config.cache.max_bytes == Some(0) {
        return Err(ConfigError::ValidationError(
            "cache.max_bytes must be positive when set".to_string(),
        ));
    }
    if config.scheduler.parallelism == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.parallelism must be at least 1".to_string(),
        ));
    }
    if config.scheduler.max_cycle_iterations == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_cycle_iterations must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_MAX_CYCLE_ITERATIONS, DEFAULT_MAX_ENTRIES};
    use std::path::PathBuf;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.cache.max_entries, DEFAULT_MAX_ENTRIES);
        assert!(config.cache.dir.is_none());
        assert!(config.cache.max_bytes.is_none());
        assert!(config.scheduler.parallelism >= 1);
        assert_eq!(config.scheduler.max_cycle_iterations, DEFAULT_MAX_CYCLE_ITERATIONS);
        assert_eq!(config.watch.debounce_ms, 0);
        assert!(config.transform.options.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[cache]
dir = ".kiln-cache"
max_entries = 512
max_bytes = 1048576
ttl_secs = 600

[scheduler]
parallelism = 2
max_cycle_iterations = 4

[watch]
debounce_ms = 50

[transform.options]
minify = false
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.cache.dir, Some(PathBuf::from(".kiln-cache")));
        assert_eq!(config.cache.max_entries, 512);
        assert_eq!(config.cache.max_bytes, Some(1_048_576));
        assert_eq!(config.cache.ttl_secs, Some(600));
        assert_eq!(config.scheduler.parallelism, 2);
        assert_eq!(config.scheduler.max_cycle_iterations, 4);
        assert_eq!(config.watch.debounce_ms, 50);
        assert_eq!(config.transform.options.len(), 1);
    }

    #[test]
    fn zero_entries_errors() {
        let result = load_config_from_str("[cache]\nmax_entries = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_bytes_errors() {
        let result = load_config_from_str("[cache]\nmax_bytes = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_parallelism_errors() {
        let result = load_config_from_str("[scheduler]\nparallelism = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_iterations_errors() {
        let result = load_config_from_str("[scheduler]\nmax_cycle_iterations = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn invalid_toml_errors() {
        let result = load_config_from_str("[cache\nmax_entries = 1");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.cache.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn load_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[scheduler]\nparallelism = 3\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.scheduler.parallelism, 3);
    }
}

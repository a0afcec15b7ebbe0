//! Configuration types deserialized from `kiln.toml`.

use kiln_common::ContentHash;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default memory-tier entry budget.
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Default bound on fixed-point iterations for cyclic module groups.
pub const DEFAULT_MAX_CYCLE_ITERATIONS: u32 = 8;

/// The top-level engine configuration parsed from `kiln.toml`.
///
/// Every section is optional; an empty file yields [`EngineConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Cache tier budgets and persistence location.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Worker pool and fixed-point bounds.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Change-batch coalescing.
    #[serde(default)]
    pub watch: WatchConfig,
    /// Options handed to the transform and hashed into every module key.
    #[serde(default)]
    pub transform: TransformSettings,
}

impl EngineConfig {
    /// Fingerprint of the configuration that affects transform output.
    ///
    /// Only the `[transform]` section participates: cache budgets and
    /// scheduling do not change what a module compiles to.
    pub fn config_hash(&self) -> ContentHash {
        self.transform.fingerprint()
    }
}

/// Memory and persistent cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory for the on-disk persistent tier. When absent, the engine
    /// runs with the memory tier only unless a store is supplied explicitly.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Maximum number of entries held in the memory tier.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Optional byte budget for the memory tier (sum of artifact outputs).
    #[serde(default)]
    pub max_bytes: Option<u64>,
    /// Optional time-to-live for memory-tier entries, in seconds.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    /// The memory-tier TTL as a [`Duration`], if configured.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: None,
            ttl_secs: None,
        }
    }
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of transforms running at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Upper bound on fixed-point iterations for a cycle, and on dependency
    /// re-discovery attempts for a single module within one generation.
    #[serde(default = "default_max_cycle_iterations")]
    pub max_cycle_iterations: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_cycle_iterations: DEFAULT_MAX_CYCLE_ITERATIONS,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_max_cycle_iterations() -> u32 {
    DEFAULT_MAX_CYCLE_ITERATIONS
}

/// Change notification coalescing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    /// Quiet period the engine waits for further notifications before it
    /// starts scanning a batch. Zero disables debouncing.
    #[serde(default)]
    pub debounce_ms: u64,
}

impl WatchConfig {
    /// The debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Transform options, passed through to the transform verbatim.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformSettings {
    /// Free-form options. Kept sorted so the fingerprint is deterministic.
    #[serde(default)]
    pub options: BTreeMap<String, OptionValue>,
}

impl TransformSettings {
    /// Looks up an option by name.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    /// Order-independent fingerprint of the options (they are sorted by key).
    pub fn fingerprint(&self) -> ContentHash {
        let parts: Vec<ContentHash> = self
            .options
            .iter()
            .map(|(name, value)| ContentHash::from_bytes(format!("{name}={value}").as_bytes()))
            .collect();
        ContentHash::combine(&parts)
    }
}

/// A scalar transform option value.
///
/// Accepts TOML booleans, integers, and strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// A boolean flag.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A string value.
    Str(String),
}

impl OptionValue {
    /// Returns the value as a boolean if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "bool:{b}"),
            OptionValue::Int(i) => write!(f, "int:{i}"),
            OptionValue::Str(s) => write!(f, "str:{s}"),
        }
    }
}

impl<'de> Deserialize<'de> for OptionValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OptionValueVisitor;

        impl<'de> Visitor<'de> for OptionValueVisitor {
            type Value = OptionValue;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a boolean, an integer, or a string")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(OptionValue::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(OptionValue::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .map(OptionValue::Int)
                    .map_err(|_| E::custom("integer option out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(OptionValue::Str(v.to_string()))
            }
        }

        deserializer.deserialize_any(OptionValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn option_value_variants() {
        let config = load_config_from_str(
            r#"
[transform.options]
minify = true
level = 3
target = "es2020"
"#,
        )
        .unwrap();
        let options = &config.transform.options;
        assert_eq!(options["minify"], OptionValue::Bool(true));
        assert_eq!(options["level"], OptionValue::Int(3));
        assert_eq!(options["target"], OptionValue::Str("es2020".to_string()));
        assert_eq!(config.transform.get("minify").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(config.transform.get("target").and_then(|v| v.as_str()), Some("es2020"));
    }

    #[test]
    fn option_value_rejects_arrays() {
        let result = load_config_from_str(
            r#"
[transform.options]
plugins = ["a", "b"]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn fingerprint_ignores_declaration_order() {
        let a = load_config_from_str("[transform.options]\na = 1\nb = \"x\"\n").unwrap();
        let b = load_config_from_str("[transform.options]\nb = \"x\"\na = 1\n").unwrap();
        assert_eq!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn fingerprint_tracks_values_and_types() {
        let int = load_config_from_str("[transform.options]\na = 1\n").unwrap();
        let string = load_config_from_str("[transform.options]\na = \"1\"\n").unwrap();
        let other = load_config_from_str("[transform.options]\na = 2\n").unwrap();
        assert_ne!(int.config_hash(), string.config_hash());
        assert_ne!(int.config_hash(), other.config_hash());
    }

    #[test]
    fn cache_budgets_do_not_affect_config_hash() {
        let small = load_config_from_str("[cache]\nmax_entries = 1\n").unwrap();
        let large = load_config_from_str("[cache]\nmax_entries = 100\n").unwrap();
        assert_eq!(small.config_hash(), large.config_hash());
    }

    #[test]
    fn durations() {
        let config = load_config_from_str(
            r#"
[cache]
ttl_secs = 30

[watch]
debounce_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(config.cache.ttl(), Some(Duration::from_secs(30)));
        assert_eq!(config.watch.debounce(), Duration::from_millis(250));
    }
}

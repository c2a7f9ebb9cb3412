//! Fit configuration, loadable from TOML.

use super::cholesky::DEFAULT_MAX_CHOLESKY_ATTEMPTS;
use super::runtime::Parallelism;
use super::store::{DEFAULT_ROWS_PER_PARTITION, TransformKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_TOLERANCE: f64 = 1.0e-8;
pub const DEFAULT_MAX_ITERATIONS: usize = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Where the initial `Y'` comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// Centers from the configured [`ClusterInitializer`](super::init::ClusterInitializer).
    #[default]
    RandomRows,
    /// Caller-supplied seed points.
    User,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlsConfig {
    /// Rank of the factorization.
    pub k: usize,
    /// Quadratic regularization weight on both factors.
    pub gamma: f64,
    pub max_iterations: usize,
    /// Stop once the average per-cell objective change drops below this.
    pub tolerance: f64,
    pub seed: Option<u64>,
    pub init: InitMode,
    pub transform: TransformKind,
    pub max_cholesky_attempts: usize,
    pub parallelism: Parallelism,
    pub threads: Option<usize>,
    /// Partition height used by loaders that build a store from a file.
    pub rows_per_partition: usize,
}

impl Default for AlsConfig {
    fn default() -> Self {
        Self {
            k: 1,
            gamma: 0.0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            seed: None,
            init: InitMode::RandomRows,
            transform: TransformKind::None,
            max_cholesky_attempts: DEFAULT_MAX_CHOLESKY_ATTEMPTS,
            parallelism: Parallelism::Rayon,
            threads: None,
            rows_per_partition: DEFAULT_ROWS_PER_PARTITION,
        }
    }
}

impl AlsConfig {
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let config = AlsConfig::from_toml_str("k = 3\ngamma = 0.5\n").unwrap();
        assert_eq!(config.k, 3);
        assert_eq!(config.gamma, 0.5);
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.max_cholesky_attempts, 10);
        assert_eq!(config.init, InitMode::RandomRows);
        assert_eq!(config.parallelism, Parallelism::Rayon);
    }

    #[test]
    fn enums_use_snake_case_names() {
        let config = AlsConfig::from_toml_str(
            "init = \"user\"\ntransform = \"standardize\"\nparallelism = \"sequential\"\n",
        )
        .unwrap();
        assert_eq!(config.init, InitMode::User);
        assert_eq!(config.transform, TransformKind::Standardize);
        assert_eq!(config.parallelism, Parallelism::Sequential);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            AlsConfig::from_toml_str("rank = 2\n"),
            Err(ConfigError::TomlParseError(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "k = 2\nseed = 42\nthreads = 2").unwrap();
        let config = AlsConfig::load(file.path()).unwrap();
        assert_eq!(config.k, 2);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.threads, Some(2));
    }
}

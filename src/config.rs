//! Configuration for the whole orchestration core.
//!
//! Everything is TOML-deserializable and every section has defaults that
//! match the constants used by the subsystems, so an empty file (or no
//! file) is a valid configuration. The CLI passes the environment
//! contract (working directory, cost budget, allowed domains) alongside.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chetana::ChetanaConfig;
use crate::retry::RetryConfig;
use crate::smriti::akasha::AkashaConfig;
use crate::vidhi::MiningConfig;

/// Errors from configuration loading.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    #[diagnostic(
        code(chitragupta::config::read),
        help("Check the path and file permissions, or omit the file to use defaults.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    #[diagnostic(
        code(chitragupta::config::parse),
        help("Fix the TOML syntax or remove the offending key; every key is optional.")
    )]
    Parse { path: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Bandit section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// "ucb1" | "thompson" | "linucb".
    pub mode: String,
    pub exploration_c: f64,
    pub linucb_alpha: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            mode: "thompson".into(),
            exploration_c: std::f64::consts::SQRT_2,
            linucb_alpha: 1.0,
        }
    }
}

/// Memory stream section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Total token budget split across the four streams.
    pub total_token_budget: usize,
    /// Device id used for the flow stream.
    pub device_id: String,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            total_token_budget: 8_000,
            device_id: "default".into(),
        }
    }
}

/// Environment contract passed in from the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub working_directory: String,
    pub cost_budget: Option<f64>,
    pub allowed_domains: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChitraguptaConfig {
    pub chetana: ChetanaConfig,
    pub akasha: AkashaConfig,
    pub vidhi: MiningConfig,
    pub bandit: BanditConfig,
    pub retry: RetryConfig,
    pub streams: StreamsConfig,
    pub environment: EnvironmentConfig,
}

impl ChitraguptaConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ChitraguptaConfig::default();
        assert_eq!(config.vidhi.min_sessions, 3);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.bandit.mode, "thompson");
        assert_eq!(config.streams.total_token_budget, 8_000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = ChitraguptaConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.streams.device_id, "default");
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[streams]\ntotal_token_budget = 500\n\n[bandit]\nmode = \"ucb1\"\n",
        )
        .unwrap();

        let config = ChitraguptaConfig::load(&path).unwrap();
        assert_eq!(config.streams.total_token_budget, 500);
        assert_eq!(config.streams.device_id, "default");
        assert_eq!(config.bandit.mode, "ucb1");
        // Unrelated sections keep their defaults.
        assert_eq!(config.vidhi.min_n, 2);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[streams\nbroken").unwrap();
        assert!(matches!(
            ChitraguptaConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = ChitraguptaConfig::default();
        let encoded = toml::to_string(&config).unwrap();
        let decoded: ChitraguptaConfig = toml::from_str(&encoded).unwrap();
        assert_eq!(
            decoded.streams.total_token_budget,
            config.streams.total_token_budget
        );
    }
}

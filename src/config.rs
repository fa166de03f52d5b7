//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Database path (DATABASE_PATH env var takes precedence)
//! - Composite aggregation policy
//! - Import redirector hosts

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::aggregate::CompositePolicy;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Composite score policy: "mean", "sum", or "median"
    pub policy: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            policy: "mean".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Image URLs containing one of these host fragments are followed to
    /// their canonical og:image URL during candidate import
    #[serde(default = "default_redirector_hosts")]
    pub redirector_hosts: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            redirector_hosts: default_redirector_hosts(),
        }
    }
}

fn default_redirector_hosts() -> Vec<String> {
    vec!["photos.app.goo".to_string()]
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    /// Database path (env var takes precedence)
    pub fn database_path(&self) -> String {
        match std::env::var("DATABASE_PATH") {
            Ok(path) if !path.is_empty() => path,
            _ => self.database.path.clone(),
        }
    }

    /// The configured aggregation policy. An unrecognized name falls back
    /// to the mean.
    pub fn composite_policy(&self) -> CompositePolicy {
        CompositePolicy::parse(&self.aggregation.policy).unwrap_or_else(|| {
            warn!(
                "Unknown aggregation policy {:?}, falling back to mean",
                self.aggregation.policy
            );
            CompositePolicy::Mean
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config is validated at compile time,
        // so this should never fail. Using a fallback for robustness.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            database: DatabaseConfig {
                path: "mining-rewards.db".to_string(),
            },
            aggregation: AggregationConfig::default(),
            import: ImportConfig::default(),
        })
    }
}

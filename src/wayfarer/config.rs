// SPDX-License-Identifier: MIT

//! Runtime configuration: YAML file with defaults, then environment overrides

use crate::wayfarer::workflow::graph::EngineLimits;
use crate::wdk::error::{Result, WayfarerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATABASE_URL_ENV: &str = "WAYFARER_DATABASE_URL";
pub const OUTPUT_DIR_ENV: &str = "WAYFARER_OUTPUT_DIR";
pub const CACHE_ENABLED_ENV: &str = "WAYFARER_CACHE_ENABLED";

fn default_database_url() -> String {
    "sqlite://wayfarer.db".into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_max_optimization_attempts() -> u32 {
    3
}

fn default_max_parallel_workers() -> usize {
    8
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_hours() -> u32 {
    24
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_optimization_attempts")]
    pub max_optimization_attempts: u32,
    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_optimization_attempts: default_max_optimization_attempts(),
            max_parallel_workers: default_max_parallel_workers(),
        }
    }
}

impl From<&EngineConfig> for EngineLimits {
    fn from(config: &EngineConfig) -> Self {
        EngineLimits {
            max_optimization_attempts: config.max_optimization_attempts,
            max_parallel_workers: config.max_parallel_workers,
        }
    }
}

/// Lookup result cache kept in the checkpoint database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_hours: default_cache_ttl_hours(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.ttl_hours))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Checkpoint database, e.g. `sqlite://wayfarer.db` or `sqlite::memory:`
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Where the file tool writes itineraries
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Graph definition to load instead of the bundled travel planner
    #[serde(default)]
    pub graph_file: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            output_dir: default_output_dir(),
            graph_file: None,
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Read the optional config file, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    WayfarerError::config(format!("failed to read {}: {}", path.display(), e))
                })?;
                Self::from_yaml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    /// Overlay values found through `lookup` (the process environment in `load`)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|v| !v.is_empty()) {
            self.database_url = url;
        }
        if let Some(dir) = lookup(OUTPUT_DIR_ENV).filter(|v| !v.is_empty()) {
            self.output_dir = PathBuf::from(dir);
        }
        match lookup(CACHE_ENABLED_ENV).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => {
                self.cache.enabled = false
            }
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => {
                self.cache.enabled = true
            }
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(WayfarerError::config("database_url must not be empty"));
        }
        if self.engine.max_optimization_attempts == 0 {
            return Err(WayfarerError::config(
                "engine.max_optimization_attempts must be at least 1",
            ));
        }
        if self.engine.max_parallel_workers == 0 {
            return Err(WayfarerError::config(
                "engine.max_parallel_workers must be at least 1",
            ));
        }
        if self.cache.enabled && self.cache.ttl_hours == 0 {
            return Err(WayfarerError::config("cache.ttl_hours must be at least 1"));
        }
        Ok(())
    }

    pub fn limits(&self) -> EngineLimits {
        EngineLimits::from(&self.engine)
    }
}

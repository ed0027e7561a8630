//! `dkr.toml` configuration
//!
//! ```toml
//! [store]
//! rules_dir = "domain_rules"
//! extension = "rules"
//! max_entries = 64
//!
//! [engine]
//! min_confidence = 0.0
//! ```
//!
//! Every key is optional; a missing file means all defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name looked up by `DkrConfig::load_from_dir`
pub const CONFIG_FILE: &str = "dkr.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DkrConfig {
    pub store: StoreConfig,
    pub engine: EngineConfig,
}

impl DkrConfig {
    /// Read `path` if it exists, otherwise fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            Self::from_toml_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(CONFIG_FILE))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.store.max_entries == 0 {
            errors.push("store.max_entries must be greater than 0");
        }
        if self.store.extension.contains('/') || self.store.extension.contains('\\') {
            errors.push("store.extension must not contain path separators");
        }
        if !(0.0..=1.0).contains(&self.engine.min_confidence) {
            errors.push("engine.min_confidence must be between 0.0 and 1.0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory that relative source ids are resolved against
    pub rules_dir: PathBuf,
    /// Extension appended to source ids that have none (without the dot)
    pub extension: String,
    /// Cached rule sets kept before the least-used one is evicted
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("domain_rules"),
            extension: "rules".to_string(),
            max_entries: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_confidence: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
        }
    }
}

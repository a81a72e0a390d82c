// SPDX-License-Identifier: MPL-2.0

use crate::constants::config as paths;
use crate::errors::VideoResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keep imported textures cached between frames.
    /// When disabled every cached texture is destroyed after each rendered frame.
    pub retain_textures: bool,
    /// Log how long each external-image bind takes
    pub log_bind_timing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retain_textures: true,
            log_bind_timing: false,
        }
    }
}

impl Config {
    /// Default location of the configuration file, if a config dir exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(paths::APP_DIR).join(paths::FILE_NAME))
    }

    /// Load the configuration from the default location with environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> VideoResult<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Load a configuration file
    pub fn load_from(path: &Path) -> VideoResult<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        let value = std::env::var(paths::NO_RETAIN_TEXTURES_ENV).ok();
        self.with_no_retain_override(value.as_deref())
    }

    fn with_no_retain_override(mut self, value: Option<&str>) -> Self {
        if value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .is_some_and(|v| v != 0)
        {
            debug!("Texture retention disabled by environment");
            self.retain_textures = false;
        }
        self
    }
}

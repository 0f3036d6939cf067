//! Configuration types and loading for chatvault.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{APP_NAME, Error, env_prefix, paths};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database.
    pub sqlite_path: PathBuf,

    /// PostgreSQL connection URL. Without it only SQLite is written.
    pub database_url: Option<String>,

    /// Directory scanned for HTML exports when no file is given.
    pub html_dir: PathBuf,

    /// Directory receiving the JSON dump.
    pub export_dir: PathBuf,

    /// Date/time normalization settings.
    pub time: TimeConfig,

    /// Slug generation settings.
    pub slug: SlugConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_path: paths::default_sqlite_path(),
            database_url: None,
            html_dir: paths::default_html_dir(),
            export_dir: paths::default_export_dir(),
            time: TimeConfig::default(),
            slug: SlugConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    ///
    /// Environment overrides are applied to the returned value but never
    /// written back to the file.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from_path(path)?
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            config
        };
        config.apply_env();
        Ok(config)
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.sqlite_path = Self::expand_path(&self.sqlite_path.to_string_lossy());
        self.html_dir = Self::expand_path(&self.html_dir.to_string_lossy());
        self.export_dir = Self::expand_path(&self.export_dir.to_string_lossy());
    }

    /// Apply `CHATVAULT_*` overrides, falling back to `DATABASE_URL` for the
    /// PostgreSQL connection.
    pub fn apply_env(&mut self) {
        let prefix = env_prefix();

        if let Some(path) = non_empty_var(&format!("{prefix}_SQLITE_PATH")) {
            self.sqlite_path = Self::expand_path(&path);
        }

        if let Some(url) = non_empty_var(&format!("{prefix}_DATABASE_URL"))
            .or_else(|| non_empty_var("DATABASE_URL"))
        {
            self.database_url = Some(url);
        }
    }
}

/// Date/time normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// IANA zone applied to timestamps that carry no offset.
    pub zone: String,

    /// Read ambiguous numeric dates as day-before-month.
    pub day_first: bool,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            zone: "Europe/Kyiv".to_string(),
            day_first: true,
        }
    }
}

/// Slug generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlugConfig {
    /// Number of words kept from the conversation name.
    pub max_words: usize,
}

impl Default for SlugConfig {
    fn default() -> Self {
        Self { max_words: 3 }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

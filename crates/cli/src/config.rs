//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Lab daemon URL
    pub api_url: Option<String>,
    /// History file for the local shell
    pub history_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the user's config directory
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to the user's config directory
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Flag or environment value first, then the config file, then the default
    pub fn resolve_api_url(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// History file for the local shell
    pub fn resolve_history_file(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        match flag.or_else(|| self.history_file.clone()) {
            Some(path) => Ok(path),
            None => Ok(config_dir()?.join("history.json")),
        }
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        Ok(config_dir()?.join("config.json"))
    }
}

fn config_dir() -> Result<PathBuf> {
    let home = dirs_next::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("labctl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_url: Some("http://lab.local:9000".to_string()),
            history_file: None,
        };

        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_api_url_precedence() {
        let config = Config {
            api_url: Some("http://from-file".to_string()),
            history_file: None,
        };
        assert_eq!(config.resolve_api_url(Some("http://from-flag")), "http://from-flag");
        assert_eq!(config.resolve_api_url(None), "http://from-file");
        assert_eq!(Config::default().resolve_api_url(None), DEFAULT_API_URL);
    }

    #[test]
    fn test_history_file_flag_wins() {
        let config = Config {
            api_url: None,
            history_file: Some(PathBuf::from("/tmp/from-file.json")),
        };
        let flag = Some(PathBuf::from("/tmp/from-flag.json"));
        assert_eq!(config.resolve_history_file(flag).unwrap(), PathBuf::from("/tmp/from-flag.json"));
        assert_eq!(config.resolve_history_file(None).unwrap(), PathBuf::from("/tmp/from-file.json"));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{oops").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}

use crate::scheduler::QualityThresholds;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Correct answers faster than this (ms) score 5 (default: 3000)
    #[serde(default = "default_fast_threshold")]
    pub fast_threshold_ms: u64,

    /// Correct answers faster than this (ms) score 4, slower ones 3 (default: 5000)
    #[serde(default = "default_hesitation_threshold")]
    pub hesitation_threshold_ms: u64,

    /// Maximum cards per study session (default: unlimited)
    #[serde(default)]
    pub session_limit: Option<usize>,

    /// Show failed cards again at the end of the session (default: true)
    #[serde(default = "default_requeue_failed")]
    pub requeue_failed: bool,

    /// Path to decks directory
    #[serde(default = "default_decks_dir")]
    pub decks_dir: PathBuf,

    /// Path to database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_fast_threshold() -> u64 {
    3000
}

fn default_hesitation_threshold() -> u64 {
    5000
}

fn default_requeue_failed() -> bool {
    true
}

fn default_decks_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("cardwise").join("decks"))
        .unwrap_or_else(|| PathBuf::from("decks"))
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("cardwise").join("cardwise.db"))
        .unwrap_or_else(|| PathBuf::from("cardwise.db"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fast_threshold_ms: default_fast_threshold(),
            hesitation_threshold_ms: default_hesitation_threshold(),
            session_limit: None,
            requeue_failed: default_requeue_failed(),
            decks_dir: default_decks_dir(),
            db_path: default_db_path(),
        }
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(suffix) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(suffix);
    }
    path.to_path_buf()
}

impl Config {
    /// Load config from the default location or return defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a specific file, falling back to defaults if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            log::debug!("No config at {}, using defaults", config_path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config: {}", config_path.display()))?;
        config.decks_dir = expand_tilde(&config.decks_dir);
        config.db_path = expand_tilde(&config.db_path);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fast_threshold_ms >= self.hesitation_threshold_ms {
            anyhow::bail!(
                "fast_threshold_ms ({}) must be lower than hesitation_threshold_ms ({})",
                self.fast_threshold_ms,
                self.hesitation_threshold_ms
            );
        }
        if self.session_limit == Some(0) {
            anyhow::bail!("session_limit must be at least 1");
        }
        Ok(())
    }

    /// Path to config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("cardwise").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn quality_thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            fast_ms: self.fast_threshold_ms,
            hesitation_ms: self.hesitation_threshold_ms,
        }
    }

    /// Ensure required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.decks_dir)?;

        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.fast_threshold_ms, 3000);
        assert_eq!(config.hesitation_threshold_ms, 5000);
        assert_eq!(config.session_limit, None);
        assert!(config.requeue_failed);
        assert_eq!(config.quality_thresholds(), QualityThresholds::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "session_limit = 20").unwrap();
        writeln!(file, "requeue_failed = false").unwrap();
        writeln!(file, "db_path = \"/tmp/cards.db\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.session_limit, Some(20));
        assert!(!config.requeue_failed);
        assert_eq!(config.db_path, PathBuf::from("/tmp/cards.db"));
        assert_eq!(config.fast_threshold_ms, 3000);
    }

    #[test]
    fn test_tilde_expansion() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "decks_dir = \"~/cards\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.decks_dir, home.join("cards"));
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "fast_threshold_ms = 6000").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("fast_threshold_ms"));
    }

    #[test]
    fn test_rejects_zero_session_limit() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "session_limit = 0").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}

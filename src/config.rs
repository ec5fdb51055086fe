//! Configuration for recap paths, thresholds, and capability endpoints.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (RECAP_HOME, RECAP_*_URL)
//! 2. Config file (.recap/config.yaml, discovered upward from cwd)
//! 3. Defaults (~/.recap, localhost capability endpoints)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::retry::RetryBudget;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub thresholds: Option<ThresholdsConfig>,
    #[serde(default)]
    pub capabilities: Option<CapabilitiesConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the config file's .recap/ directory)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdsConfig {
    pub confidence: Option<f64>,
    pub approval_window_minutes: Option<i64>,
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitiesConfig {
    pub extractor_url: Option<String>,
    pub matcher_url: Option<String>,
    pub projection_url: Option<String>,
    pub email_url: Option<String>,
}

/// Resolved configuration with absolute paths and filled defaults
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to recap home (state directory)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub thresholds: Thresholds,
    pub capabilities: CapabilityEndpoints,
}

#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Confidence floor for candidates and batches
    pub confidence: f64,
    /// Approval window in minutes
    pub approval_window_minutes: i64,
    /// Retry budget for capability calls
    pub retry: RetryBudget,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            approval_window_minutes: 30,
            retry: RetryBudget::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityEndpoints {
    pub extractor_url: String,
    pub matcher_url: String,
    pub projection_url: String,
    pub email_url: String,
}

impl Default for CapabilityEndpoints {
    fn default() -> Self {
        Self {
            extractor_url: "http://127.0.0.1:8791".to_string(),
            matcher_url: "http://127.0.0.1:8792".to_string(),
            projection_url: "http://127.0.0.1:8793".to_string(),
            email_url: "http://127.0.0.1:8794".to_string(),
        }
    }
}

impl ResolvedConfig {
    /// Path to the SQLite database ($RECAP_HOME/recap.db)
    pub fn db_path(&self) -> PathBuf {
        self.home.join("recap.db")
    }

    /// Directory for per-meeting lock files
    pub fn locks_dir(&self) -> PathBuf {
        self.home.join("locks")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".recap").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_or(value: Option<String>, env_var: &str, default: &str) -> String {
    std::env::var(env_var)
        .ok()
        .or(value)
        .unwrap_or_else(|| default.to_string())
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".recap");

    let config_file = find_config_file();
    let parsed = match config_file.as_deref() {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    let home = if let Ok(env_home) = std::env::var("RECAP_HOME") {
        PathBuf::from(env_home)
    } else if let Some(home_path) = parsed.as_ref().and_then(|c| c.paths.home.clone()) {
        // home is relative to the .recap/ directory
        let recap_dir = config_file
            .as_deref()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));
        let path = PathBuf::from(&home_path);
        if path.is_absolute() {
            path
        } else {
            recap_dir.join(path)
        }
    } else {
        default_home
    };

    let thresholds_cfg = parsed.as_ref().and_then(|c| c.thresholds.clone());
    let mut thresholds = Thresholds::default();
    if let Some(cfg) = thresholds_cfg {
        if let Some(confidence) = cfg.confidence {
            thresholds.confidence = confidence;
        }
        if let Some(minutes) = cfg.approval_window_minutes {
            thresholds.approval_window_minutes = minutes;
        }
        if let Some(attempts) = cfg.retry_attempts {
            thresholds.retry.max_attempts = attempts;
        }
    }

    let caps_cfg = parsed.as_ref().and_then(|c| c.capabilities.clone());
    let defaults = CapabilityEndpoints::default();
    let capabilities = CapabilityEndpoints {
        extractor_url: env_or(
            caps_cfg.as_ref().and_then(|c| c.extractor_url.clone()),
            "RECAP_EXTRACTOR_URL",
            &defaults.extractor_url,
        ),
        matcher_url: env_or(
            caps_cfg.as_ref().and_then(|c| c.matcher_url.clone()),
            "RECAP_MATCHER_URL",
            &defaults.matcher_url,
        ),
        projection_url: env_or(
            caps_cfg.as_ref().and_then(|c| c.projection_url.clone()),
            "RECAP_PROJECTION_URL",
            &defaults.projection_url,
        ),
        email_url: env_or(
            caps_cfg.as_ref().and_then(|c| c.email_url.clone()),
            "RECAP_EMAIL_URL",
            &defaults.email_url,
        ),
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        thresholds,
        capabilities,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.confidence, 0.5);
        assert_eq!(thresholds.approval_window_minutes, 30);
        assert_eq!(thresholds.retry.max_attempts, 3);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let recap_dir = temp.path().join(".recap");
        std::fs::create_dir_all(&recap_dir).unwrap();

        let config_path = recap_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
thresholds:
  confidence: 0.7
  approval_window_minutes: 15
  retry_attempts: 5
capabilities:
  extractor_url: http://extract.internal:9000
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));

        let thresholds = config.thresholds.unwrap();
        assert_eq!(thresholds.confidence, Some(0.7));
        assert_eq!(thresholds.approval_window_minutes, Some(15));
        assert_eq!(thresholds.retry_attempts, Some(5));

        let caps = config.capabilities.unwrap();
        assert_eq!(
            caps.extractor_url.as_deref(),
            Some("http://extract.internal:9000")
        );
        assert_eq!(caps.matcher_url, None);
    }

    #[test]
    fn test_db_and_locks_paths() {
        let config = ResolvedConfig {
            home: PathBuf::from("/test/.recap"),
            config_file: None,
            thresholds: Thresholds::default(),
            capabilities: CapabilityEndpoints::default(),
        };

        assert_eq!(config.db_path(), PathBuf::from("/test/.recap/recap.db"));
        assert_eq!(config.locks_dir(), PathBuf::from("/test/.recap/locks"));
    }
}

//! Configuration for a vault

use crate::VaultError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Vault Configuration

[scan]
# Recognized image extensions (matched case-insensitively, without the dot)
extensions = ["jpg", "jpeg", "png", "gif", "webp", "bmp"]
# Tag newly discovered images with their parent folder names
auto_tag = false

[ignore]
# Directory or file names skipped during scans
patterns = [
    ".vault",
    ".vault_thumbs",
    "thumbs",
    ".git",
    "__pycache__",
    ".DS_Store",
]

[io]
# Attempts for filesystem calls that fail transiently (locked files, EINTR)
retry_attempts = 3
# Delay between attempts, multiplied by the attempt number
retry_backoff = "50ms"
# Longest wait for the vault lock before failing with a lock timeout
lock_timeout = "30s"

[query]
# Page size when a search does not set a limit
default_page_size = 100
# Largest page size a search may request
max_page_size = 500
"#;

/// Vault configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub auto_tag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default = "default_ignore_patterns")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: String,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

// Default value functions
fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_ignore_patterns() -> Vec<String> {
    [
        ".vault",
        ".vault_thumbs",
        "thumbs",
        ".git",
        "__pycache__",
        ".DS_Store",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff() -> String {
    "50ms".to_string()
}
fn default_lock_timeout() -> String {
    "30s".to_string()
}
fn default_page_size() -> usize {
    100
}
fn default_max_page_size() -> usize {
    500
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            auto_tag: false,
        }
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: default_ignore_patterns(),
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff: default_retry_backoff(),
            lock_timeout: default_lock_timeout(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| VaultError::ConfigParse(e.to_string()))
    }

    /// Whether `ext` (with or without a leading dot) is a recognized image extension
    pub fn is_image_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.scan
            .extensions
            .iter()
            .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Delay before the first retry of a transient IO failure
    pub fn retry_backoff(&self) -> Duration {
        parse_duration(&self.io.retry_backoff).unwrap_or(Duration::from_millis(50))
    }

    /// Longest wait for the vault lock
    pub fn lock_timeout(&self) -> Duration {
        parse_duration(&self.io.lock_timeout).unwrap_or(Duration::from_secs(30))
    }
}

/// Parse duration string (e.g., "50ms", "30s", "5m", "1h", "1d")
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        return num_str.parse().ok().map(Duration::from_millis);
    }

    if !s.is_char_boundary(s.len() - 1) {
        return None;
    }
    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    match unit {
        "s" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_secs(num * 60)),
        "h" => Some(Duration::from_secs(num * 3600)),
        "d" => Some(Duration::from_secs(num * 86400)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.scan.extensions.len(), 6);
        assert!(!config.scan.auto_tag);
        assert_eq!(config.io.retry_attempts, 3);
        assert_eq!(config.query.max_page_size, 500);
        assert!(config.ignore.patterns.iter().any(|p| p == ".vault"));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.query.default_page_size, 100);
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("50ms"), Some(Duration::from_millis(50)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172800)));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let config = Config::default();
        assert!(config.is_image_extension("JPG"));
        assert!(config.is_image_extension(".Png"));
        assert!(config.is_image_extension("webp"));
        assert!(!config.is_image_extension("txt"));
        assert!(!config.is_image_extension("raw"));
    }

    #[test]
    fn test_bad_toml_is_config_parse_error() {
        let err = Config::from_toml("[scan]\nextensions = 5").unwrap_err();
        assert!(matches!(err, VaultError::ConfigParse(_)));
    }
}

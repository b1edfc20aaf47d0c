//! Configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, optional TOML file,
//! `MARKDEX_*` environment variables (`__` separates nested keys, e.g.
//! `MARKDEX_WATCH__DEBOUNCE_MS`).

use crate::browsers::firefox::FirefoxSchema;
use crate::error::SetupError;
use crate::logging::LoggingConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkdexConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub chrome: ChromeConfig,

    #[serde(default)]
    pub firefox: FirefoxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the on-disk store. Defaults to the platform data
    /// directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "markdex", "markdex")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Quiescence interval of the event reducer, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the `Bookmarks` JSON file. Defaults to the default profile
    /// of a standard Chrome install.
    #[serde(default)]
    pub bookmarks_file: Option<PathBuf>,

    #[serde(default = "default_hooks")]
    pub hooks: Vec<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        ChromeConfig {
            enabled: default_true(),
            bookmarks_file: None,
            hooks: default_hooks(),
        }
    }
}

impl ChromeConfig {
    /// Resolved bookmark file path, falling back to the platform default.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.bookmarks_file
            .clone()
            .or_else(default_chrome_bookmarks)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirefoxConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Path to `places.sqlite`. Firefox profiles are per-install salted
    /// directories, so there is no reliable default; required when enabled.
    #[serde(default)]
    pub places_file: Option<PathBuf>,

    #[serde(default = "default_hooks")]
    pub hooks: Vec<String>,

    #[serde(default)]
    pub schema: FirefoxSchemaConfig,
}

impl Default for FirefoxConfig {
    fn default() -> Self {
        FirefoxConfig {
            enabled: false,
            places_file: None,
            hooks: default_hooks(),
            schema: FirefoxSchemaConfig::default(),
        }
    }
}

/// Overridable `moz_bookmarks` discriminants, for profiles created by a
/// schema version with different reserved ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirefoxSchemaConfig {
    #[serde(default = "d_type_url")]
    pub type_url: i64,
    #[serde(default = "d_type_tag_folder")]
    pub type_tag_folder: i64,
    #[serde(default = "d_root_id")]
    pub root_id: i64,
    #[serde(default = "d_tags_root_id")]
    pub tags_root_id: i64,
    #[serde(default = "d_max_reserved_id")]
    pub max_reserved_id: i64,
}

fn d_type_url() -> i64 {
    1
}
fn d_type_tag_folder() -> i64 {
    2
}
fn d_root_id() -> i64 {
    1
}
fn d_tags_root_id() -> i64 {
    4
}
fn d_max_reserved_id() -> i64 {
    6
}

impl Default for FirefoxSchemaConfig {
    fn default() -> Self {
        FirefoxSchemaConfig {
            type_url: d_type_url(),
            type_tag_folder: d_type_tag_folder(),
            root_id: d_root_id(),
            tags_root_id: d_tags_root_id(),
            max_reserved_id: d_max_reserved_id(),
        }
    }
}

impl FirefoxSchemaConfig {
    pub fn to_schema(&self) -> FirefoxSchema {
        FirefoxSchema {
            type_url: self.type_url,
            type_tag_folder: self.type_tag_folder,
            root_id: self.root_id,
            tags_root_id: self.tags_root_id,
            max_reserved_id: self.max_reserved_id,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_hooks() -> Vec<String> {
    vec!["title-tags".to_string()]
}

fn default_chrome_bookmarks() -> Option<PathBuf> {
    let base = directories::BaseDirs::new()?;
    #[cfg(target_os = "linux")]
    let path = base
        .config_dir()
        .join("google-chrome/Default/Bookmarks");
    #[cfg(target_os = "macos")]
    let path = base
        .home_dir()
        .join("Library/Application Support/Google/Chrome/Default/Bookmarks");
    #[cfg(target_os = "windows")]
    let path = base
        .data_local_dir()
        .join("Google/Chrome/User Data/Default/Bookmarks");
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let path = base.config_dir().join("google-chrome/Default/Bookmarks");
    Some(path)
}

impl MarkdexConfig {
    /// Defaults with environment overlay, no config file.
    pub fn load() -> Result<Self, SetupError> {
        Self::build(None)
    }

    /// A specific TOML file with environment overlay.
    pub fn load_from_file(path: &Path) -> Result<Self, SetupError> {
        Self::build(Some(path))
    }

    fn build(file: Option<&Path>) -> Result<Self, SetupError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            let name = path.to_str().ok_or_else(|| {
                SetupError::Config(format!("config path is not valid utf-8: {path:?}"))
            })?;
            builder = builder.add_source(File::with_name(name));
        }
        builder = builder.add_source(
            Environment::with_prefix("MARKDEX")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sensible() {
        let cfg = MarkdexConfig::default();
        assert!(cfg.chrome.enabled);
        assert!(!cfg.firefox.enabled);
        assert_eq!(cfg.watch.debounce_ms, 500);
        assert_eq!(cfg.firefox.schema.tags_root_id, 4);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markdex.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
[watch]
debounce_ms = 50

[firefox]
enabled = true
places_file = "/tmp/places.sqlite"

[firefox.schema]
tags_root_id = 5
"#
        )
        .unwrap();

        let cfg = MarkdexConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.watch.debounce_ms, 50);
        assert!(cfg.firefox.enabled);
        assert_eq!(
            cfg.firefox.places_file,
            Some(PathBuf::from("/tmp/places.sqlite"))
        );
        assert_eq!(cfg.firefox.schema.tags_root_id, 5);
        // untouched sections keep their defaults
        assert!(cfg.chrome.enabled);
    }

    #[test]
    fn schema_config_converts() {
        let schema = FirefoxSchemaConfig::default().to_schema();
        assert_eq!(schema.type_url, 1);
        assert_eq!(schema.max_reserved_id, 6);
    }
}

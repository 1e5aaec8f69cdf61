//! Configuration module for the iPhoto downloader.
//!
//! Provides the typed configuration record that maps to the YAML
//! configuration file, with loading, validation, defaults, and path
//! resolution helpers. Every recognized option is a named field here;
//! no free-form key-value pairs are accepted at runtime.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Token accepted in any configured path; expands to the user-local
/// application-data directory.
pub const LOCALAPPDATA_TOKEN: &str = "%LOCALAPPDATA%";

/// Top-level configuration for the iPhoto downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Root directory the photo tree is synchronized into. Required.
    pub sync_directory: PathBuf,
    /// When true, the engine decides but never writes.
    pub dry_run: bool,
    /// Per-cycle download cap; 0 means unlimited.
    pub max_downloads: u32,
    /// Skip remote photos larger than this many MiB; 0 means no cap.
    pub max_file_size_mb: u64,
    /// Log level: `debug`, `info`, `warning`, or `error`.
    pub log_level: LogLevel,
    /// One cycle then exit, or repeat forever.
    pub execution_mode: ExecutionMode,
    /// Skip the single-instance lock when true.
    pub allow_multi_instance: bool,
    /// Whether personal albums are considered at all.
    pub include_personal_albums: bool,
    /// Whether shared albums are considered at all.
    pub include_shared_albums: bool,
    /// Personal album allowlist; empty means all personal albums.
    pub personal_album_names_to_include: BTreeSet<String>,
    /// Shared album allowlist; empty means all shared albums.
    pub shared_album_names_to_include: BTreeSet<String>,
    /// Parent directory of the tracker database. Absolute, relative to the
    /// sync root, or containing [`LOCALAPPDATA_TOKEN`].
    pub database_parent_directory: String,
    /// Pushover delivery settings.
    pub pushover: PushoverConfig,
    /// Inclusive port range the 2FA web server may bind within.
    pub auth_web_port_range: PortRange,
}

/// Log verbosity levels recognized in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive this level corresponds to.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Whether the scheduler runs one cycle or loops forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Single,
    Continuous,
}

/// Pushover push-notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PushoverConfig {
    /// Master switch; when false the other fields are ignored.
    pub enabled: bool,
    /// Application API token. Never logged.
    pub api_token: String,
    /// User key. Never logged.
    pub user_key: String,
    /// Optional target device name.
    pub device: Option<String>,
}

/// Inclusive port range for the 2FA web server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 8080,
            end: 8090,
        }
    }
}

impl PortRange {
    /// Iterates the candidate ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_directory: PathBuf::new(),
            dry_run: false,
            max_downloads: 0,
            max_file_size_mb: 0,
            log_level: LogLevel::default(),
            execution_mode: ExecutionMode::default(),
            allow_multi_instance: false,
            include_personal_albums: true,
            include_shared_albums: true,
            personal_album_names_to_include: BTreeSet::new(),
            shared_album_names_to_include: BTreeSet::new(),
            database_parent_directory: LOCALAPPDATA_TOKEN.to_string(),
            pushover: PushoverConfig::default(),
            auth_web_port_range: PortRange::default(),
        }
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"pushover.api_token"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/iphoto_downloader/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("iphoto_downloader")
            .join("config.yaml")
    }

    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.sync_directory.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync_directory".into(),
                message: "must be set".into(),
            });
        }

        if self.auth_web_port_range.start > self.auth_web_port_range.end {
            errors.push(ValidationError {
                field: "auth_web_port_range".into(),
                message: format!(
                    "start ({}) must not exceed end ({})",
                    self.auth_web_port_range.start, self.auth_web_port_range.end
                ),
            });
        }

        if self.pushover.enabled {
            if self.pushover.api_token.is_empty() {
                errors.push(ValidationError {
                    field: "pushover.api_token".into(),
                    message: "required when pushover.enabled is true".into(),
                });
            }
            if self.pushover.user_key.is_empty() {
                errors.push(ValidationError {
                    field: "pushover.user_key".into(),
                    message: "required when pushover.enabled is true".into(),
                });
            }
        }

        if !self.include_personal_albums && !self.include_shared_albums {
            errors.push(ValidationError {
                field: "include_personal_albums".into(),
                message: "at least one of personal/shared album kinds must be included".into(),
            });
        }

        errors
    }

    /// Resolves the tracker's parent directory.
    ///
    /// - Absolute paths are used verbatim.
    /// - Relative paths resolve against the sync root.
    /// - [`LOCALAPPDATA_TOKEN`] anywhere in the path expands to the host's
    ///   user-local application-data directory.
    pub fn resolved_database_dir(&self) -> PathBuf {
        let expanded = expand_localappdata(&self.database_parent_directory);
        let path = PathBuf::from(expanded);
        if path.is_absolute() {
            path
        } else {
            self.sync_directory.join(path)
        }
    }
}

/// Expands [`LOCALAPPDATA_TOKEN`] using the platform's user-local data
/// directory (`%LOCALAPPDATA%` on Windows, `$XDG_DATA_HOME` or
/// `$HOME/.local/share` elsewhere).
pub fn expand_localappdata(raw: &str) -> String {
    if !raw.contains(LOCALAPPDATA_TOKEN) {
        return raw.to_string();
    }
    let base = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .to_string_lossy()
        .into_owned();
    raw.replace(LOCALAPPDATA_TOKEN, &base)
}

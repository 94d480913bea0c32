//! Configuration file support for writeflow
//!
//! Reads from .writeflow/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Version history retention
    #[serde(default)]
    pub versions: VersionConfig,

    /// Chat transcript limits
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Storage-related configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Which flavour of writing project this store holds.
    /// Selects the default database file name (`.writeflow/<kind>.db`).
    /// Default: "writeassist"
    #[serde(default = "default_project_kind")]
    pub project_kind: String,
}

/// Version snapshot configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VersionConfig {
    /// Maximum snapshots kept per (project, user, phase); oldest are pruned first.
    /// Default: 50
    #[serde(default = "default_max_versions")]
    pub max_versions: i64,

    /// Minimum word-count change before an auto-save creates a snapshot.
    /// Default: 50
    #[serde(default = "default_snapshot_word_delta")]
    pub snapshot_word_delta: i32,
}

/// Chat configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    /// Messages longer than this many characters are truncated on append.
    /// Default: 65535
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Title given to sessions created implicitly by a default-routed append.
    /// Default: "New Chat"
    #[serde(default = "default_session_title")]
    pub default_session_title: String,
}

fn default_project_kind() -> String {
    "writeassist".to_string()
}

fn default_max_versions() -> i64 {
    50
}

fn default_snapshot_word_delta() -> i32 {
    50
}

fn default_max_message_length() -> usize {
    65_535
}

fn default_session_title() -> String {
    "New Chat".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            project_kind: default_project_kind(),
        }
    }
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
            snapshot_word_delta: default_snapshot_word_delta(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            default_session_title: default_session_title(),
        }
    }
}

/// Runtime limits consulted by the version and chat managers
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_versions: i64,
    pub snapshot_word_delta: i32,
    pub max_message_length: usize,
    pub default_session_title: String,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl Config {
    /// Load config from .writeflow/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("ignoring invalid {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".writeflow").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Database file name for the configured project kind
    pub fn db_file_name(&self) -> String {
        format!("{}.db", self.storage.project_kind)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            max_versions: self.versions.max_versions.max(1),
            snapshot_word_delta: self.versions.snapshot_word_delta.max(0),
            max_message_length: self.chat.max_message_length.max(1),
            default_session_title: self.chat.default_session_title.clone(),
        }
    }
}

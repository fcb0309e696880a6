//! Configuration management for jarvis.
//!
//! Configuration is loaded from `jarvis_config.json` next to the executable.
//! The file doubles as the store for the last health-check timestamp, which is
//! the only field ever written back.

use crate::error::JarvisError;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "jarvis_config.json";
pub const DEFAULT_CONVERSATIONS_DIR: &str = "conversations";

/// Format used when writing `last_health_check` back to disk.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Inference server endpoints.
    pub api: ApiEndpoints,
    /// Model and sampling parameters.
    pub model: ModelSettings,
    /// Local ISO-8601 timestamp of the last health check, or empty.
    pub last_health_check: String,
    /// Where conversation logs live (default: `./conversations`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations_dir: Option<PathBuf>,
    /// Keys we don't know about survive a write-back.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Named endpoints of the inference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoints {
    /// GET endpoint listing loaded models (`{"data": [...]}`).
    pub models: String,
    /// POST endpoint for chat completions.
    pub completion: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub name: String,
    /// System prompt sent ahead of every user message.
    pub behavior: String,
    pub temperature: f64,
    /// `-1` asks the server for no limit.
    pub max_tokens: i64,
    pub stream: bool,
}

impl Config {
    /// Directory holding conversation logs.
    pub fn conversations_dir(&self) -> PathBuf {
        self.conversations_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERSATIONS_DIR))
    }

    /// Parse `last_health_check`. An empty value yields `None`.
    pub fn last_health_check(&self) -> Result<Option<NaiveDateTime>, JarvisError> {
        let value = self.last_health_check.trim();
        if value.is_empty() {
            return Ok(None);
        }
        parse_timestamp(value).map(Some)
    }

    pub fn set_last_health_check(&mut self, at: NaiveDateTime) {
        self.last_health_check = at.format(TIMESTAMP_FORMAT).to_string();
    }
}

/// Accepts a naive local timestamp or an RFC 3339 one with an offset.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, JarvisError> {
    if let Ok(ts) = value.parse::<NaiveDateTime>() {
        return Ok(ts);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Local).naive_local())
        .map_err(|_| JarvisError::InvalidTimestamp(value.to_string()))
}

/// A configuration together with the file it was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    pub config: Config,
}

impl ConfigFile {
    /// Get the default config file path: beside the running executable.
    pub fn default_path() -> Result<PathBuf> {
        let exe = std::env::current_exe().context("Failed to get current executable path")?;
        let dir = exe
            .parent()
            .context("Executable path has no parent directory")?;
        Ok(dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`. A missing file is fatal.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(JarvisError::ConfigNotFound(path).into());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&contents).map_err(|source| JarvisError::InvalidConfig {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the configuration back to the file it came from.
    pub fn save(&self) -> Result<()> {
        let mut contents = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut contents, formatter);
        self.config.serialize(&mut serializer)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write config file: {}", self.path.display()))?;
        Ok(())
    }
}

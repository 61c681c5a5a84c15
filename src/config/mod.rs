//! Launch Configuration
//! Defaults, an optional JSON file and environment overrides, plus the
//! embedding flags that restrict canvas interaction

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::LayoutOptions;


/// Path of a JSON config file
pub const ENV_CONFIG: &str = "STATEVIZ_CONFIG";
/// Start in inspecting mode (`1`/`true`)
pub const ENV_INSPECT: &str = "STATEVIZ_INSPECT";
/// External layout command line
pub const ENV_LAYOUT_CMD: &str = "STATEVIZ_LAYOUT_CMD";
/// File where viewport positions are persisted
pub const ENV_POSITION_STORE: &str = "STATEVIZ_POSITION_STORE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Embedding restrictions; absent means the canvas is not embedded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbedOptions {
    pub pan: bool,
    pub zoom: bool,
    pub read_only: bool,
    pub controls: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            pan: false,
            zoom: false,
            read_only: true,
            controls: false,
        }
    }
}

impl EmbedOptions {
    /// Parse `pan=1&zoom=0&readOnly=0&controls=1`; unknown keys are ignored.
    /// Values are read as numbers, so `"0"` and non-numbers are false.
    pub fn from_query(query: &str) -> Self {
        let mut options = Self::default();
        let query = query.trim_start_matches('?');

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let flag = query_flag(value);
            match key {
                "pan" => options.pan = flag,
                "zoom" => options.zoom = flag,
                "readOnly" => options.read_only = flag,
                "controls" => options.controls = flag,
                _ => {}
            }
        }
        options
    }
}

fn query_flag(value: &str) -> bool {
    value
        .trim()
        .parse::<f64>()
        .map(|n| n != 0.0 && !n.is_nan())
        .unwrap_or(false)
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Relay inspected machines instead of interpreting locally
    pub inspect: bool,
    /// Embedding flags, `None` when running standalone
    pub embed: Option<EmbedOptions>,
    /// External layout command; the built-in engine when absent
    pub layout_command: Option<String>,
    pub layout: LayoutOptions,
    /// JSON file for persisted viewport positions; in-memory when absent
    pub position_store: Option<PathBuf>,
    /// Unknown guards pass during local simulation
    pub permissive_guards: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inspect: false,
            embed: None,
            layout_command: None,
            layout: LayoutOptions::default(),
            position_store: None,
            permissive_guards: true,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then `file` (or `STATEVIZ_CONFIG`), then environment overrides
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let env_file = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
        let mut config = match file.map(Path::to_path_buf).or(env_file) {
            Some(path) => {
                log::info!("loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_INSPECT) {
            self.inspect = matches!(value.trim(), "1" | "true" | "yes");
        }
        if let Some(value) = lookup(ENV_LAYOUT_CMD).filter(|v| !v.trim().is_empty()) {
            self.layout_command = Some(value);
        }
        if let Some(value) = lookup(ENV_POSITION_STORE).filter(|v| !v.trim().is_empty()) {
            self.position_store = Some(PathBuf::from(value));
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.embed.is_some()
    }
}

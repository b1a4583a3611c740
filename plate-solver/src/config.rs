use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::solve::api::DEFAULT_API_BASE;
use crate::solve::client::{
    ClientOptions, DEFAULT_ANNOTATED_BASE, DEFAULT_STATUS_BASE, UploadOptions,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// API key; when set it replaces the one saved in the store
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_annotated_base")]
    pub annotated_base: String,

    #[serde(default = "default_status_base")]
    pub status_base: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// JSON file holding the API key, session token and last submission
    #[serde(default = "default_store_path")]
    pub store_path: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub upload: UploadConfig,
}

/// Flags attached to every upload, as accepted by astrometry.net
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_publicly_visible")]
    pub publicly_visible: String,

    #[serde(default = "default_permission")]
    pub allow_modifications: String,

    #[serde(default = "default_permission")]
    pub allow_commercial_use: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_annotated_base() -> String {
    DEFAULT_ANNOTATED_BASE.to_string()
}

fn default_status_base() -> String {
    DEFAULT_STATUS_BASE.to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_store_path() -> String {
    "data/plate_solver.json".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_publicly_visible() -> String {
    "y".to_string()
}

fn default_permission() -> String {
    "d".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            publicly_visible: default_publicly_visible(),
            allow_modifications: default_permission(),
            allow_commercial_use: default_permission(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            annotated_base: default_annotated_base(),
            status_base: default_status_base(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            store_path: default_store_path(),
            log_dir: default_log_dir(),
            log_level: default_log_level(),
            upload: UploadConfig::default(),
        }
    }
}

impl SolverConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path))?;
        let config: SolverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path))?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            annotated_base: self.annotated_base.clone(),
            status_base: self.status_base.clone(),
            poll_interval: self.poll_interval(),
            upload: UploadOptions {
                publicly_visible: self.upload.publicly_visible.clone(),
                allow_modifications: self.upload.allow_modifications.clone(),
                allow_commercial_use: self.upload.allow_commercial_use.clone(),
            },
        }
    }
}

pub static CONFIG: OnceLock<SolverConfig> = OnceLock::new();

/// Load the config file into `CONFIG`; a missing file means defaults
pub fn read_config(path: &str) -> anyhow::Result<&'static SolverConfig> {
    let config = if Path::new(path).exists() {
        SolverConfig::from_file(path)?
    } else {
        SolverConfig::default()
    };

    Ok(CONFIG.get_or_init(|| config))
}

// Configuration Storage Service
// Handles config file read/write, environment overrides and version backup

use crate::services::detection::{
    ClassificationPolicy, DetectError, Detector, PerplexityEstimator, DEFAULT_MIN_ALNUM_CHARS,
    DEFAULT_STRIDE,
};
use crate::services::oracle::{ORACLE_DEFAULT_MODEL, ORACLE_DEFAULT_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<DetectError> for ConfigError {
    fn from(err: DetectError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            oracle: OracleConfig::default(),
            detection: DetectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Longest accepted input, in characters
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Detections allowed to run against the oracle at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_inference: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_input_chars: default_max_input_chars(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_inference: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleConfig {
    #[serde(default = "default_oracle_url")]
    pub base_url: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
    /// Lowers the context length the model reports, when set
    #[serde(default)]
    pub context_limit: Option<usize>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_url(),
            model_id: default_model_id(),
            timeout_secs: default_oracle_timeout(),
            context_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionConfig {
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default = "default_min_alnum")]
    pub min_alnum_chars: usize,
    #[serde(default = "default_true")]
    pub truncate_perplexity: bool,
    #[serde(default)]
    pub policy: ClassificationPolicy,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
            min_alnum_chars: DEFAULT_MIN_ALNUM_CHARS,
            truncate_perplexity: true,
            policy: ClassificationPolicy::default(),
        }
    }
}

impl DetectionConfig {
    /// Build a detector for an oracle with the given context length.
    ///
    /// A stride longer than the context is clamped down to it.
    pub fn build_detector(&self, context_limit: usize) -> Result<Detector, DetectError> {
        let stride = if self.stride > context_limit && context_limit > 0 {
            warn!(
                stride = self.stride,
                context_limit, "config.stride_clamped_to_context"
            );
            context_limit
        } else {
            self.stride
        };
        let estimator = PerplexityEstimator::new(context_limit, stride, self.truncate_perplexity)?;
        Detector::new(estimator, self.policy.clone(), self.min_alnum_chars)
    }
}

fn default_version() -> String { env!("CARGO_PKG_VERSION").to_string() }
fn default_bind_addr() -> String { "0.0.0.0:5000".to_string() }
fn default_max_input_chars() -> usize { 20_000 }
fn default_request_timeout() -> u64 { 120 }
fn default_max_concurrent() -> usize { 2 }
fn default_oracle_url() -> String { ORACLE_DEFAULT_URL.to_string() }
fn default_model_id() -> String { ORACLE_DEFAULT_MODEL.to_string() }
fn default_oracle_timeout() -> u64 { 60 }
fn default_stride() -> usize { DEFAULT_STRIDE }
fn default_min_alnum() -> usize { DEFAULT_MIN_ALNUM_CHARS }
fn default_true() -> bool { true }

impl AppConfig {
    /// Apply `PPLDETECTOR_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("PPLDETECTOR_BIND") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("PPLDETECTOR_ORACLE_URL") {
            self.oracle.base_url = v;
        }
        if let Some(v) = get("PPLDETECTOR_STRIDE") {
            match v.parse() {
                Ok(stride) => self.detection.stride = stride,
                Err(_) => warn!(value = %v, "config.invalid_stride_override"),
            }
        }
        if let Some(v) = get("PPLDETECTOR_MAX_INPUT_CHARS") {
            match v.parse() {
                Ok(max) => self.server.max_input_chars = max,
                Err(_) => warn!(value = %v, "config.invalid_max_input_override"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_concurrent_inference == 0 {
            return Err(ConfigError::Invalid(
                "server.maxConcurrentInference must be at least 1".to_string(),
            ));
        }
        if self.server.max_input_chars == 0 || self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.maxInputChars and server.requestTimeoutSecs must be positive".to_string(),
            ));
        }
        if self.detection.stride == 0 {
            return Err(ConfigError::Invalid("detection.stride must be positive".to_string()));
        }
        if self.detection.min_alnum_chars == 0 {
            return Err(ConfigError::Invalid(
                "detection.minAlnumChars must be positive".to_string(),
            ));
        }
        self.detection.policy.validate()?;
        Ok(())
    }
}

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        match std::env::var("PPLDETECTOR_CONFIG_DIR") {
            Ok(p) if !p.trim().is_empty() => Some(PathBuf::from(p)),
            _ => dirs::config_dir().map(|p| p.join("ppl-detector")),
        }
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Ensure config directory exists
    pub fn ensure_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.config_dir)?;
        Ok(())
    }

    /// Load configuration from file; a missing file yields defaults
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.ensure_dir()?;

        // Create backup if file exists
        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Create a backup of current config
    fn create_backup(&self) -> Result<(), ConfigError> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir)?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));
        fs::copy(&self.config_file, &backup_file)?;

        // Keep only last 10 backups
        self.cleanup_old_backups(&backup_dir, 10)
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), ConfigError> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        // Timestamped names sort oldest first
        entries.sort_by_key(|e| e.file_name());

        for entry in entries.iter().take(entries.len() - keep) {
            let _ = fs::remove_file(entry.path());
        }

        Ok(())
    }
}

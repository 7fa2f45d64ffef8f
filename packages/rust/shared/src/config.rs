//! Application configuration for Leakscan.
//!
//! User config lives at `~/.leakscan/leakscan.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LeakscanError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leakscan.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leakscan";

// ---------------------------------------------------------------------------
// Config structs (matching leakscan.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// GitHub API settings.
    #[serde(default)]
    pub github: GithubConfig,

    /// Scan pipeline tuning.
    #[serde(default)]
    pub scan: ScanSettings,

    /// Storage locations.
    #[serde(default)]
    pub storage: StorageSettings,
}

/// `[github]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API tokens, rotated across outbound requests.
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Baseline requests per second for the fixed-rate limiter.
    #[serde(default = "default_request_rate")]
    pub request_rate: f64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            request_rate: default_request_rate(),
        }
    }
}

fn default_request_rate() -> f64 {
    0.5
}

/// `[scan]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Desired keyword context length in bytes.
    #[serde(default = "default_context_len")]
    pub context_len: usize,

    /// Hard ceiling on a merged fragment's length in bytes.
    #[serde(default = "default_max_context_len")]
    pub max_context_len: usize,

    /// Retry ceiling per request before it is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff in seconds after a WAIT classification or timeout.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Bounded queue capacity between pipeline phases.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Concurrent dispatch workers.
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    /// Concurrent response-processing workers.
    #[serde(default = "default_process_workers")]
    pub process_workers: usize,

    /// Concurrent fragmentizer workers.
    #[serde(default = "default_fragment_workers")]
    pub fragment_workers: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            context_len: default_context_len(),
            max_context_len: default_max_context_len(),
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            queue_capacity: default_queue_capacity(),
            dispatch_workers: default_dispatch_workers(),
            process_workers: default_process_workers(),
            fragment_workers: default_fragment_workers(),
        }
    }
}

fn default_context_len() -> usize {
    480
}
fn default_max_context_len() -> usize {
    640
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_secs() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    4096
}
fn default_dispatch_workers() -> usize {
    1
}
fn default_process_workers() -> usize {
    2
}
fn default_fragment_workers() -> usize {
    2
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path to the libSQL database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory holding raw fetched payloads, one file per content hash.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            content_dir: default_content_dir(),
        }
    }
}

fn default_db_path() -> String {
    "~/.leakscan/leakscan.db".into()
}
fn default_content_dir() -> String {
    "~/.leakscan/content".into()
}

// ---------------------------------------------------------------------------
// Scan config (runtime snapshot handed to each pipeline run)
// ---------------------------------------------------------------------------

/// Immutable per-run pipeline configuration.
///
/// Settings may change between runs; a snapshot is taken at run start so a
/// running pipeline never observes a mutation.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub tokens: Vec<String>,
    pub request_rate: f64,
    pub context_len: usize,
    pub max_context_len: usize,
    pub max_retries: u32,
    pub backoff_secs: u64,
    pub queue_capacity: usize,
    pub dispatch_workers: usize,
    pub process_workers: usize,
    pub fragment_workers: usize,
}

impl From<&AppConfig> for ScanConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            tokens: config.github.tokens.clone(),
            request_rate: config.github.request_rate,
            context_len: config.scan.context_len,
            max_context_len: config.scan.max_context_len,
            max_retries: config.scan.max_retries,
            backoff_secs: config.scan.backoff_secs,
            queue_capacity: config.scan.queue_capacity,
            dispatch_workers: config.scan.dispatch_workers,
            process_workers: config.scan.process_workers,
            fragment_workers: config.scan.fragment_workers,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leakscan/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LeakscanError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leakscan/leakscan.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeakscanError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LeakscanError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeakscanError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LeakscanError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeakscanError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that at least one GitHub token is configured.
pub fn validate_tokens(config: &AppConfig) -> Result<()> {
    if config.github.tokens.iter().any(|t| !t.is_empty()) {
        Ok(())
    } else {
        Err(LeakscanError::config(
            "no GitHub tokens configured. Add tokens under [github] in leakscan.toml.",
        ))
    }
}

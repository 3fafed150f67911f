//! Application configuration for redline.
//!
//! User config lives at `~/.redline/redline.toml`.
//! CLI flags override the environment, which overrides config file values,
//! which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RedlineError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "redline.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".redline";

/// Environment variable overriding `documents.root`.
pub const DOCUMENTS_PATH_ENV: &str = "REDLINE_DOCUMENTS_PATH";

// ---------------------------------------------------------------------------
// Config structs (matching redline.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source document location.
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Run artifact locations.
    #[serde(default)]
    pub output: OutputConfig,

    /// Stage retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Stage executor subprocess.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Strike-through inference thresholds.
    #[serde(default)]
    pub strike: StrikeConfig,
}

/// `[documents]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Directory scanned for source documents.
    #[serde(default = "default_documents_root")]
    pub root: String,

    /// Create the root directory when it does not exist.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// File extension to accept, compared case-insensitively.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Sort listings by file name instead of filesystem order.
    #[serde(default)]
    pub sort: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            create_if_missing: true,
            extension: default_extension(),
            sort: false,
        }
    }
}

fn default_documents_root() -> String {
    "documents".into()
}
fn default_extension() -> String {
    "pdf".into()
}
fn default_true() -> bool {
    true
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Execution log JSON file.
    #[serde(default = "default_log_path")]
    pub log_path: String,

    /// Final stage results JSON file.
    #[serde(default = "default_results_path")]
    pub results_path: String,

    /// Optional corpus JSON file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<String>,

    /// Write each intermediate conversion next to the run artifacts.
    #[serde(default)]
    pub keep_intermediate: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            results_path: default_results_path(),
            corpus_path: None,
            keep_intermediate: false,
        }
    }
}

fn default_log_path() -> String {
    "logs/execution_log.json".into()
}
fn default_results_path() -> String {
    "final_results.json".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per stage, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Substrings that must all appear in an error for it to be retried.
    #[serde(default = "default_transient_markers")]
    pub transient_markers: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            transient_markers: default_transient_markers(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    5_000
}
fn default_transient_markers() -> Vec<String> {
    vec!["INTERNAL".into(), "500".into()]
}

/// `[bridge]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable that serves stage requests over stdin/stdout.
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default = "default_bridge_args")]
    pub args: Vec<String>,

    /// Working directory for the subprocess.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Model identifier forwarded with each request.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: default_bridge_args(),
            working_dir: default_working_dir(),
            model: default_model(),
        }
    }
}

fn default_bridge_command() -> String {
    "python".into()
}
fn default_bridge_args() -> Vec<String> {
    vec!["bridge.py".into()]
}
fn default_working_dir() -> String {
    ".".into()
}
fn default_model() -> String {
    "gemini-2.5-flash".into()
}

/// `[strike]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeConfig {
    /// Thickest drawn line (in points) still treated as a strike line.
    #[serde(default = "default_max_line_thickness")]
    pub max_line_thickness: f64,

    /// Largest |dy/dx| still treated as horizontal.
    #[serde(default = "default_max_slope")]
    pub max_slope: f64,
}

impl Default for StrikeConfig {
    fn default() -> Self {
        Self {
            max_line_thickness: default_max_line_thickness(),
            max_slope: default_max_slope(),
        }
    }
}

fn default_max_line_thickness() -> f64 {
    2.0
}
fn default_max_slope() -> f64 {
    0.1
}

impl AppConfig {
    /// Apply `REDLINE_DOCUMENTS_PATH` if it is set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(root) = std::env::var(DOCUMENTS_PATH_ENV) {
            if !root.is_empty() {
                tracing::debug!(%root, "documents root overridden from environment");
                self.documents.root = root;
            }
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(RedlineError::config("retry.max_attempts must be at least 1"));
        }
        if self.documents.extension.trim_start_matches('.').is_empty() {
            return Err(RedlineError::config("documents.extension must not be empty"));
        }
        if self.bridge.command.is_empty() {
            return Err(RedlineError::config("bridge.command must not be empty"));
        }
        if self.strike.max_line_thickness <= 0.0 || self.strike.max_slope < 0.0 {
            return Err(RedlineError::config(
                "strike thresholds must be positive",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.redline/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RedlineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.redline/redline.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
///
/// The environment override is applied and the result validated.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RedlineError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RedlineError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RedlineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RedlineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RedlineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

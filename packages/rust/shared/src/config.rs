//! Application configuration for careerkb.
//!
//! User config lives at `~/.careerkb/careerkb.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CareerKbError, Result};
use crate::types::PiiCategory;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "careerkb.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".careerkb";

// ---------------------------------------------------------------------------
// Config structs (matching careerkb.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    /// PII categories redacted before staging.
    #[serde(default)]
    pub sanitizer: SanitizerConfig,

    /// Conflict classification thresholds.
    #[serde(default)]
    pub conflict: ConflictConfig,

    /// Lock and retry policy shared by both stores.
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    /// External text-extraction commands.
    #[serde(default)]
    pub extraction: ExtractionSection,

    /// HTTP settings for profile and patent scraping.
    #[serde(default)]
    pub http: HttpConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the live knowledge base JSON files.
    #[serde(default = "default_kb_dir")]
    pub knowledge_base_dir: String,

    /// Directory holding one JSON file per staged item.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            knowledge_base_dir: default_kb_dir(),
            staging_dir: default_staging_dir(),
        }
    }
}

fn default_kb_dir() -> String {
    "knowledge_base".into()
}
fn default_staging_dir() -> String {
    "data/staging".into()
}

/// `[sanitizer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    #[serde(default = "default_redact")]
    pub redact: Vec<PiiCategory>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            redact: default_redact(),
        }
    }
}

fn default_redact() -> Vec<PiiCategory> {
    PiiCategory::ALL.to_vec()
}

/// `[conflict]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Minimum title similarity for two entries to describe the same thing.
    #[serde(default = "default_title_threshold")]
    pub title_threshold: f64,

    /// Minimum description/body similarity that identifies an entry when
    /// titles only loosely agree.
    #[serde(default = "default_text_threshold")]
    pub text_threshold: f64,

    /// Body similarity at or above which a matched entry is a duplicate.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            title_threshold: default_title_threshold(),
            text_threshold: default_text_threshold(),
            duplicate_threshold: default_duplicate_threshold(),
        }
    }
}

fn default_title_threshold() -> f64 {
    0.80
}
fn default_text_threshold() -> f64 {
    0.85
}
fn default_duplicate_threshold() -> f64 {
    0.97
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum wait for a store lock before failing.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Delay before the single retry of a transient I/O failure.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

fn default_lock_timeout() -> u64 {
    5_000
}
fn default_retry_backoff() -> u64 {
    100
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Documents prepared concurrently in one batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// `[extraction]` section.
///
/// Commands are argument vectors; `{path}` is replaced with the document path.
/// An empty vector disables that document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSection {
    #[serde(default = "default_pdf_command")]
    pub pdf_command: Vec<String>,

    #[serde(default = "default_docx_command")]
    pub docx_command: Vec<String>,

    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            pdf_command: default_pdf_command(),
            docx_command: default_docx_command(),
            timeout_secs: default_extraction_timeout(),
        }
    }
}

fn default_pdf_command() -> Vec<String> {
    ["pdftotext", "-layout", "{path}", "-"]
        .map(String::from)
        .to_vec()
}
fn default_docx_command() -> Vec<String> {
    ["pandoc", "--to", "plain", "{path}"]
        .map(String::from)
        .to_vec()
}
fn default_extraction_timeout() -> u64 {
    60
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 {
    10
}
fn default_user_agent() -> String {
    concat!("careerkb/", env!("CARGO_PKG_VERSION")).into()
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig, threaded through constructors)
// ---------------------------------------------------------------------------

/// Which PII categories the sanitizer redacts.
#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    pub categories: Vec<PiiCategory>,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            categories: PiiCategory::ALL.to_vec(),
        }
    }
}

impl SanitizeOptions {
    pub fn enabled(&self, category: PiiCategory) -> bool {
        self.categories.contains(&category)
    }
}

impl From<&AppConfig> for SanitizeOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            categories: config.sanitizer.redact.clone(),
        }
    }
}

/// Thresholds used by the conflict resolver.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityConfig {
    pub title_threshold: f64,
    pub text_threshold: f64,
    pub duplicate_threshold: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SimilarityConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            title_threshold: config.conflict.title_threshold,
            text_threshold: config.conflict.text_threshold,
            duplicate_threshold: config.conflict.duplicate_threshold,
        }
    }
}

/// Lock and retry policy for a store.
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub lock_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for StoreSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            lock_timeout: Duration::from_millis(config.store.lock_timeout_ms),
            retry_backoff: Duration::from_millis(config.store.retry_backoff_ms),
        }
    }
}

/// External extraction commands, merged from config.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub pdf_command: Vec<String>,
    pub docx_command: Vec<String>,
    pub timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ExtractionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            pdf_command: config.extraction.pdf_command.clone(),
            docx_command: config.extraction.docx_command.clone(),
            timeout: Duration::from_secs(config.extraction.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.careerkb/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CareerKbError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.careerkb/careerkb.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
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
    let content = std::fs::read_to_string(path).map_err(|e| CareerKbError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CareerKbError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CareerKbError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CareerKbError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CareerKbError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject threshold and limit values that would make the pipeline misbehave.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let thresholds = [
        ("title_threshold", config.conflict.title_threshold),
        ("text_threshold", config.conflict.text_threshold),
        ("duplicate_threshold", config.conflict.duplicate_threshold),
    ];
    for (name, value) in thresholds {
        if !(0.0..=1.0).contains(&value) {
            return Err(CareerKbError::config(format!(
                "conflict.{name} must be between 0 and 1, got {value}"
            )));
        }
    }
    if config.ingest.concurrency == 0 {
        return Err(CareerKbError::config("ingest.concurrency must be at least 1"));
    }
    if config.store.lock_timeout_ms == 0 {
        return Err(CareerKbError::config("store.lock_timeout_ms must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("knowledge_base_dir"));
        assert!(toml_str.contains("street_address"));
        assert!(toml_str.contains("pdftotext"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[paths]
staging_dir = "/tmp/stage"

[sanitizer]
redact = ["email", "government_id"]

[conflict]
title_threshold = 0.9
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.paths.staging_dir, "/tmp/stage");
        assert_eq!(config.paths.knowledge_base_dir, "knowledge_base");
        assert_eq!(config.sanitizer.redact.len(), 2);
        assert_eq!(config.conflict.title_threshold, 0.9);
        assert_eq!(config.conflict.duplicate_threshold, 0.97);

        let opts = SanitizeOptions::from(&config);
        assert!(opts.enabled(PiiCategory::Email));
        assert!(!opts.enabled(PiiCategory::Phone));
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let app = AppConfig::default();
        let store = StoreSettings::from(&app);
        assert_eq!(store.lock_timeout, Duration::from_secs(5));
        assert_eq!(store.retry_backoff, Duration::from_millis(100));

        let sim = SimilarityConfig::from(&app);
        assert_eq!(sim.title_threshold, 0.80);

        let extraction = ExtractionConfig::from(&app);
        assert_eq!(extraction.pdf_command[0], "pdftotext");
        assert_eq!(extraction.timeout, Duration::from_secs(60));
    }

    #[test]
    fn validation_rejects_out_of_range_thresholds() {
        let mut config = AppConfig::default();
        config.conflict.text_threshold = 1.5;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("text_threshold"));

        let mut config = AppConfig::default();
        config.ingest.concurrency = 0;
        assert!(validate_config(&config).is_err());

        assert!(validate_config(&AppConfig::default()).is_ok());
    }
}

//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required. Every other table falls back to defaults that
//! reproduce the production behaviour: promotion at 10 occurrences, a
//! 200-sample calibration floor, 0.6/0.8 default thresholds and 100
//! contributions per indexer run.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::anonymize::DetectorKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub anonymizer: AnonymizerConfig,
    #[serde(default)]
    pub patterns: PatternsConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// PII detector tuning. Built-in detectors run in a fixed priority order;
/// entries here can disable one or replace its pattern. Custom detectors
/// run after the built-ins.
#[derive(Debug, Deserialize, Clone)]
pub struct AnonymizerConfig {
    #[serde(default)]
    pub detectors: Vec<DetectorOverride>,
    #[serde(default)]
    pub custom: Vec<CustomDetector>,
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self {
            detectors: Vec::new(),
            custom: Vec::new(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

fn default_max_snippet_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorOverride {
    pub name: DetectorKind,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CustomDetector {
    pub name: String,
    pub pattern: String,
    pub placeholder: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatternsConfig {
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: i64,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: default_promotion_threshold(),
        }
    }
}

fn default_promotion_threshold() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: i64,
    #[serde(default = "default_low")]
    pub default_low: f64,
    #[serde(default = "default_medium")]
    pub default_medium: f64,
    /// Added to the mean confidence of corrected items to get the new medium cutoff.
    #[serde(default = "default_margin")]
    pub margin: f64,
    /// Distance between the medium and low cutoffs.
    #[serde(default = "default_band_gap")]
    pub band_gap: f64,
    #[serde(default = "default_floor")]
    pub floor: f64,
    #[serde(default = "default_ceiling")]
    pub ceiling: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            default_low: default_low(),
            default_medium: default_medium(),
            margin: default_margin(),
            band_gap: default_band_gap(),
            floor: default_floor(),
            ceiling: default_ceiling(),
        }
    }
}

fn default_min_samples() -> i64 {
    200
}
fn default_low() -> f64 {
    0.6
}
fn default_medium() -> f64 {
    0.8
}
fn default_margin() -> f64 {
    0.1
}
fn default_band_gap() -> f64 {
    0.2
}
fn default_floor() -> f64 {
    0.4
}
fn default_ceiling() -> f64 {
    0.95
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub high_quality_only: bool,
    #[serde(default = "default_max_prompt_examples")]
    pub max_prompt_examples: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            high_quality_only: false,
            max_prompt_examples: default_max_prompt_examples(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_prompt_examples() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_indexer_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_indexer_batch_size(),
        }
    }
}

fn default_indexer_batch_size() -> usize {
    100
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hashing" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hashing.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Patterns
    if config.patterns.promotion_threshold < 1 {
        bail!("patterns.promotion_threshold must be >= 1");
    }

    // Calibration
    let cal = &config.calibration;
    if !(0.0 < cal.floor && cal.floor < cal.ceiling && cal.ceiling <= 1.0) {
        bail!("calibration.floor and calibration.ceiling must satisfy 0 < floor < ceiling <= 1");
    }
    if !(cal.floor <= cal.default_low
        && cal.default_low < cal.default_medium
        && cal.default_medium <= cal.ceiling)
    {
        bail!("calibration defaults must satisfy floor <= default_low < default_medium <= ceiling");
    }
    if cal.band_gap <= 0.0 {
        bail!("calibration.band_gap must be > 0");
    }
    if cal.min_samples < 1 {
        bail!("calibration.min_samples must be >= 1");
    }

    // Retrieval / indexer
    if config.retrieval.k == 0 {
        bail!("retrieval.k must be >= 1");
    }
    if config.indexer.batch_size == 0 {
        bail!("indexer.batch_size must be >= 1");
    }
    if config.anonymizer.max_snippet_chars == 0 {
        bail!("anonymizer.max_snippet_chars must be >= 1");
    }

    Ok(())
}

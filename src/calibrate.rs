//! Per-category confidence threshold calibration.
//!
//! The extraction model attaches a confidence score to each line item.
//! Items the reviewers had to correct tell us how far that score can be
//! trusted: if corrected items were extracted with a mean confidence of
//! 0.85, a "medium" cutoff of 0.8 is too generous. The calibrator moves
//! the medium cutoff to just above that mean (plus a margin), keeps the
//! low cutoff a fixed gap below it, and clamps both into
//! `[floor, ceiling]`.
//!
//! Each trade category is calibrated independently. A category needs at
//! least `min_samples` approved corrections before its thresholds move,
//! unless the run is forced.

use std::fmt;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use serde::Serialize;

use crate::config::{CalibrationConfig, Config};
use crate::db;
use crate::error::Result;
use crate::models::{ConfidenceBand, ConfidenceThreshold};
use crate::store::Store;

const EPSILON: f64 = 1e-9;

/// A low/medium cutoff pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub low: f64,
    pub medium: f64,
}

impl Thresholds {
    /// Band a raw model score: high at or above `medium`, medium at or
    /// above `low`, low below.
    pub fn classify(&self, score: f64) -> ConfidenceBand {
        if score >= self.medium {
            ConfidenceBand::High
        } else if score >= self.low {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    fn differs_from(&self, other: &Thresholds) -> bool {
        (self.low - other.low).abs() > EPSILON || (self.medium - other.medium).abs() > EPSILON
    }
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "low={:.2} medium={:.2}", self.low, self.medium)
    }
}

/// Number of corrections per confidence band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BandCounts {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

/// Why a calibration did or did not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationReason {
    Calibrated,
    Forced,
    InsufficientSamples,
    NoChange,
}

impl CalibrationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationReason::Calibrated => "calibrated",
            CalibrationReason::Forced => "forced",
            CalibrationReason::InsufficientSamples => "insufficient_samples",
            CalibrationReason::NoChange => "no_change",
        }
    }
}

impl fmt::Display for CalibrationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationResult {
    pub trade_category: String,
    pub updated: bool,
    pub previous: Thresholds,
    pub suggested: Thresholds,
    pub total_corrections: i64,
    pub band_counts: BandCounts,
    pub avg_confidence: Option<f64>,
    pub reason: CalibrationReason,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchCalibrationSummary {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_processed: usize,
    pub results: Vec<CalibrationResult>,
}

pub struct ThresholdCalibrator {
    store: Arc<dyn Store>,
    config: CalibrationConfig,
}

impl ThresholdCalibrator {
    pub fn new(store: Arc<dyn Store>, config: CalibrationConfig) -> Self {
        Self { store, config }
    }

    fn defaults(&self) -> Thresholds {
        Thresholds {
            low: self.config.default_low,
            medium: self.config.default_medium,
        }
    }

    /// Current thresholds for a trade category.
    ///
    /// Falls back to the configured defaults when nothing is stored, the
    /// stored row is out of range, or the read fails.
    pub async fn get_thresholds(&self, trade_category: &str) -> Thresholds {
        match self.store.get_thresholds(trade_category).await {
            Ok(Some(row)) => {
                let stored = Thresholds {
                    low: row.low_threshold,
                    medium: row.medium_threshold,
                };
                if self.in_range(&stored) {
                    stored
                } else {
                    tracing::warn!(
                        trade = trade_category,
                        "stored thresholds {} are out of range, using defaults",
                        stored
                    );
                    self.defaults()
                }
            }
            Ok(None) => self.defaults(),
            Err(e) => {
                tracing::warn!(
                    trade = trade_category,
                    "failed to read thresholds, using defaults: {}",
                    e
                );
                self.defaults()
            }
        }
    }

    /// Band a raw model score with the category's current thresholds.
    pub async fn classify(&self, trade_category: &str, score: f64) -> ConfidenceBand {
        self.get_thresholds(trade_category).await.classify(score)
    }

    fn in_range(&self, t: &Thresholds) -> bool {
        t.low >= self.config.floor - EPSILON
            && t.low < t.medium
            && t.medium <= self.config.ceiling + EPSILON
    }

    /// Recompute thresholds for one trade category and store them if they
    /// moved.
    pub async fn calibrate(&self, trade_category: &str, force: bool) -> Result<CalibrationResult> {
        let previous = self.get_thresholds(trade_category).await;
        let contributions = self
            .store
            .approved_contributions(Some(trade_category))
            .await?;

        let total = contributions.len() as i64;
        let mut bands = BandCounts::default();
        let mut sum = 0.0;
        let mut scored = 0usize;
        for confidence in contributions.iter().filter_map(|c| c.original_confidence) {
            match previous.classify(confidence) {
                ConfidenceBand::High => bands.high += 1,
                ConfidenceBand::Medium => bands.medium += 1,
                ConfidenceBand::Low => bands.low += 1,
            }
            sum += confidence;
            scored += 1;
        }
        let avg_confidence = (scored > 0).then(|| sum / scored as f64);

        let suggested = suggest_thresholds(&previous, avg_confidence, &self.config);
        let enough = total >= self.config.min_samples;

        let reason = if !enough && !force {
            CalibrationReason::InsufficientSamples
        } else if !suggested.differs_from(&previous) {
            CalibrationReason::NoChange
        } else if enough {
            CalibrationReason::Calibrated
        } else {
            CalibrationReason::Forced
        };
        let updated = matches!(
            reason,
            CalibrationReason::Calibrated | CalibrationReason::Forced
        );

        if updated {
            self.store
                .upsert_thresholds(&ConfidenceThreshold {
                    trade_category: trade_category.to_string(),
                    low_threshold: suggested.low,
                    medium_threshold: suggested.medium,
                    total_corrections: total,
                    high_confidence_corrections: bands.high,
                    medium_confidence_corrections: bands.medium,
                    low_confidence_corrections: bands.low,
                    last_calibrated_at: chrono::Utc::now().timestamp(),
                })
                .await?;
            tracing::info!(
                trade = trade_category,
                total,
                "thresholds {} -> {}",
                previous,
                suggested
            );
        } else {
            tracing::debug!(trade = trade_category, total, reason = %reason, "calibration skipped");
        }

        Ok(CalibrationResult {
            trade_category: trade_category.to_string(),
            updated,
            previous,
            suggested,
            total_corrections: total,
            band_counts: bands,
            avg_confidence,
            reason,
        })
    }

    /// Calibrate every known trade category, one after another.
    ///
    /// A failing category is logged and counted; the others still run.
    pub async fn calibrate_all(&self, force: bool) -> Result<BatchCalibrationSummary> {
        let categories = self.store.trade_categories().await?;
        let mut summary = BatchCalibrationSummary::default();

        for trade in &categories {
            summary.total_processed += 1;
            match self.calibrate(trade, force).await {
                Ok(result) => {
                    if result.updated {
                        summary.updated += 1;
                    } else {
                        summary.skipped += 1;
                    }
                    summary.results.push(result);
                }
                Err(e) => {
                    tracing::warn!(trade = %trade, "calibration failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            processed = summary.total_processed,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "calibration finished"
        );
        Ok(summary)
    }
}

/// Round up to two decimals, ignoring float noise below 1e-9.
fn ceil2(x: f64) -> f64 {
    ((x * 100.0) - EPSILON).ceil() / 100.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Compute new thresholds from the current ones and the mean confidence of
/// corrected items.
///
/// The medium cutoff never drops below the current one, and the result
/// always satisfies `floor <= low < medium <= ceiling`.
pub fn suggest_thresholds(
    current: &Thresholds,
    avg_confidence: Option<f64>,
    config: &CalibrationConfig,
) -> Thresholds {
    let medium = match avg_confidence {
        Some(avg) => current.medium.max(ceil2(avg + config.margin)),
        None => current.medium,
    };
    let medium = round2(medium.max(config.floor + 0.05).min(config.ceiling));
    let low = round2((medium - config.band_gap).max(config.floor));
    Thresholds { low, medium }
}

pub async fn run_calibrate(
    config: &Config,
    trade: Option<&str>,
    all: bool,
    force: bool,
) -> AnyResult<()> {
    let store = Arc::new(db::open_store(config).await?);
    let calibrator = ThresholdCalibrator::new(store.clone(), config.calibration.clone());

    match (trade, all) {
        (Some(trade), false) => {
            let result = calibrator.calibrate(trade, force).await?;
            println!("calibrate");
            print_result(&result);
        }
        (None, true) => {
            let summary = calibrator.calibrate_all(force).await?;
            print_summary(&summary);
        }
        _ => anyhow::bail!("Specify either a trade category or --all"),
    }

    store.pool().close().await;
    Ok(())
}

pub(crate) fn print_summary(summary: &BatchCalibrationSummary) {
    println!("calibrate");
    println!("  categories: {}", summary.total_processed);
    println!("  updated: {}", summary.updated);
    println!("  skipped: {}", summary.skipped);
    println!("  failed: {}", summary.failed);
    for result in &summary.results {
        print_result(result);
    }
}

fn print_result(r: &CalibrationResult) {
    let avg = r
        .avg_confidence
        .map(|a| format!("{:.3}", a))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "  {:<16} {:<20} {} -> {}  (n={}, avg={}, high/medium/low={}/{}/{})",
        r.trade_category,
        r.reason,
        r.previous,
        r.suggested,
        r.total_corrections,
        avg,
        r.band_counts.high,
        r.band_counts.medium,
        r.band_counts.low
    );
}

pub async fn run_thresholds(config: &Config, trade: &str) -> AnyResult<()> {
    let store = Arc::new(db::open_store(config).await?);
    let calibrator = ThresholdCalibrator::new(store.clone(), config.calibration.clone());

    let current = calibrator.get_thresholds(trade).await;
    println!("{}", trade);
    println!("  low:    {:.2}", current.low);
    println!("  medium: {:.2}", current.medium);
    match store.get_thresholds(trade).await? {
        Some(row) => {
            println!("  corrections: {}", row.total_corrections);
            println!(
                "  bands (high/medium/low): {}/{}/{}",
                row.high_confidence_corrections,
                row.medium_confidence_corrections,
                row.low_confidence_corrections
            );
            println!(
                "  last calibrated: {}",
                chrono::DateTime::from_timestamp(row.last_calibrated_at, 0)
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| row.last_calibrated_at.to_string())
            );
        }
        None => println!("  (defaults, never calibrated)"),
    }

    store.pool().close().await;
    Ok(())
}

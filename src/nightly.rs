//! The nightly job: pattern analysis and threshold calibration over every
//! trade category.
//!
//! The two jobs read the same approved contributions and write disjoint
//! tables, so they run concurrently. Each outcome is reported on its own;
//! a failure in one job does not hide the other's summary.

use std::sync::Arc;

use anyhow::{bail, Result as AnyResult};

use crate::calibrate::{self, BatchCalibrationSummary, ThresholdCalibrator};
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::patterns::{self, AnalysisReport, PatternAnalyzer};
use crate::store::Store;

#[derive(Debug)]
pub struct NightlyReport {
    pub patterns: Result<AnalysisReport>,
    pub calibration: Result<BatchCalibrationSummary>,
}

impl NightlyReport {
    pub fn is_success(&self) -> bool {
        self.patterns.is_ok() && self.calibration.is_ok()
    }
}

pub async fn run_nightly_jobs(store: Arc<dyn Store>, config: &Config) -> NightlyReport {
    let analyzer = PatternAnalyzer::new(store.clone(), config.patterns.promotion_threshold);
    let calibrator = ThresholdCalibrator::new(store, config.calibration.clone());

    let (patterns, calibration) =
        tokio::join!(analyzer.analyze(None), calibrator.calibrate_all(false));

    if let Err(e) = &patterns {
        tracing::warn!("pattern analysis failed: {}", e);
    }
    if let Err(e) = &calibration {
        tracing::warn!("threshold calibration failed: {}", e);
    }

    NightlyReport {
        patterns,
        calibration,
    }
}

pub async fn run_nightly(config: &Config) -> AnyResult<()> {
    let store = Arc::new(db::open_store(config).await?);
    let started = std::time::Instant::now();

    let report = run_nightly_jobs(store.clone(), config).await;

    match &report.patterns {
        Ok(r) => patterns::print_report(r),
        Err(e) => println!("analyze\n  error: {}", e),
    }
    match &report.calibration {
        Ok(s) => calibrate::print_summary(s),
        Err(e) => println!("calibrate\n  error: {}", e),
    }
    println!("nightly finished in {:.1}s", started.elapsed().as_secs_f64());

    store.pool().close().await;
    if !report.is_success() {
        bail!("nightly run finished with errors");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::testutil::{approved, description, seed, FlakyPatternStore};

    fn config() -> Config {
        toml::from_str::<Config>("[db]\npath = \"unused.sqlite\"\n").unwrap()
    }

    fn rows() -> Vec<crate::models::Contribution> {
        (0..200)
            .map(|i| {
                let mut c = approved(
                    &format!("c-{:03}", i),
                    "electrical",
                    description("Cu wire", "Copper wire"),
                    i,
                );
                c.original_confidence = Some(0.85);
                c
            })
            .collect()
    }

    #[tokio::test]
    async fn test_nightly_runs_both_jobs() {
        let store = Arc::new(InMemoryStore::new());
        seed(store.as_ref(), &rows()).await;

        let report = run_nightly_jobs(store.clone(), &config()).await;
        assert!(report.is_success());
        assert_eq!(report.patterns.unwrap().promoted.len(), 1);
        assert_eq!(report.calibration.unwrap().updated, 1);

        let row = store.get_thresholds("electrical").await.unwrap().unwrap();
        assert_eq!(row.medium_threshold, 0.95);
    }

    #[tokio::test]
    async fn test_analyzer_failure_keeps_calibration_summary() {
        let store = Arc::new(FlakyPatternStore::failing_listing());
        seed(store.as_ref(), &rows()).await;

        let report = run_nightly_jobs(store.clone(), &config()).await;
        assert!(!report.is_success());
        assert!(report.patterns.is_err());
        let calibration = report.calibration.unwrap();
        assert_eq!(calibration.updated, 1);
        assert!(store.get_thresholds("electrical").await.unwrap().is_some());
    }
}

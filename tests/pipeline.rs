//! End-to-end feedback loop against a real SQLite database.

use std::sync::Arc;

use tempfile::TempDir;
use training_feedback::anonymize::Anonymizer;
use training_feedback::calibrate::{CalibrationReason, ThresholdCalibrator};
use training_feedback::config::CalibrationConfig;
use training_feedback::contribute::{self, Decision};
use training_feedback::db;
use training_feedback::embedding::{EmbeddingProvider, HashingProvider};
use training_feedback::error::FeedbackError;
use training_feedback::indexer::EmbeddingIndexer;
use training_feedback::migrate;
use training_feedback::models::{
    Change, ConfidenceThreshold, Contribution, CorrectionEmbedding, CorrectionKind,
    CorrectionPayload, ModerationState, NewCorrection, PatternRefinement, PatternValue,
    PriceBucket, PriceValue, RefinementKind,
};
use training_feedback::patterns::{active_patterns, format_pattern_rules, PatternAnalyzer};
use training_feedback::retriever::{format_examples_block, Retriever};
use training_feedback::store::{SqliteStore, Store};

async fn setup() -> (TempDir, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("feedback.sqlite"))
        .await
        .unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    (tmp, Arc::new(SqliteStore::new(pool)))
}

fn correction(trade: &str, payload: CorrectionPayload, confidence: Option<f64>) -> NewCorrection {
    NewCorrection {
        trade_category: trade.to_string(),
        document_category: "bid".to_string(),
        correction: payload,
        text_snippet: Some("Furnish and install per drawings, see schedule on sheet E-2".to_string()),
        original_confidence: confidence,
    }
}

fn description(from: &str, to: &str) -> CorrectionPayload {
    CorrectionPayload::Description(Change::new(from.to_string(), to.to_string()))
}

async fn submit_approved(store: &SqliteStore, new: &NewCorrection) -> Contribution {
    let anonymizer = Anonymizer::default();
    let c = contribute::submit_correction(store, &anonymizer, new)
        .await
        .unwrap();
    contribute::moderate(store, &c.id, Decision::Approve)
        .await
        .unwrap()
}

fn raw_contribution(id: &str, trade: &str, state: ModerationState, at: i64) -> Contribution {
    Contribution {
        id: id.to_string(),
        trade_category: trade.to_string(),
        document_category: "bid".to_string(),
        correction: description("Cu wire", "Copper wire"),
        redacted_text_snippet: None,
        original_confidence: Some(0.85),
        moderation_state: state,
        contributed_at: at,
        moderated_at: None,
    }
}

#[tokio::test]
async fn test_contribution_round_trips_through_sqlite() {
    let (_tmp, store) = setup().await;
    let price = correction(
        "concrete",
        CorrectionPayload::Price(Change::new(
            PriceValue {
                total_price: Some(7_500.0),
                ..Default::default()
            },
            PriceValue {
                total_price: Some(8_200.0),
                ..Default::default()
            },
        )),
        Some(0.4),
    );

    let c = contribute::submit_correction(store.as_ref(), &Anonymizer::default(), &price)
        .await
        .unwrap();
    let loaded = store.get_contribution(&c.id).await.unwrap().unwrap();
    assert_eq!(loaded, c);
    match loaded.correction {
        CorrectionPayload::Price(change) => {
            assert_eq!(change.original.total_price, None);
            assert_eq!(change.original.total_price_range, Some(PriceBucket::From5KTo10K));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_moderation_is_pending_only() {
    let (_tmp, store) = setup().await;
    let c = contribute::submit_correction(
        store.as_ref(),
        &Anonymizer::default(),
        &correction("electrical", description("a", "b"), None),
    )
    .await
    .unwrap();

    assert_eq!(contribute::list_pending(store.as_ref(), 10).await.unwrap().len(), 1);

    let rejected = contribute::moderate(store.as_ref(), &c.id, Decision::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.moderation_state, ModerationState::Rejected);

    let err = contribute::moderate(store.as_ref(), &c.id, Decision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, FeedbackError::Validation(_)));

    let err = contribute::moderate(store.as_ref(), "nope", Decision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, FeedbackError::NotFound(_)));
    assert!(store.approved_contributions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pattern_upsert_merges_monotonically() {
    let (_tmp, store) = setup().await;
    let base = PatternRefinement {
        trade_category: "electrical".to_string(),
        refinement_kind: RefinementKind::Terminology,
        pattern_key: "cu_wire".to_string(),
        pattern_value: PatternValue {
            from: "Cu wire".to_string(),
            to: "Copper wire".to_string(),
            context: None,
        },
        occurrence_count: 12,
        is_active: true,
        auto_promoted_at: Some(100),
        created_at: 1,
        updated_at: 100,
    };
    store.upsert_pattern(&base).await.unwrap();

    let stale = PatternRefinement {
        occurrence_count: 4,
        is_active: false,
        auto_promoted_at: Some(500),
        updated_at: 500,
        ..base.clone()
    };
    store.upsert_pattern(&stale).await.unwrap();

    let rows = store.list_patterns(Some("electrical"), false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].occurrence_count, 12);
    assert!(rows[0].is_active);
    assert_eq!(rows[0].auto_promoted_at, Some(100));
    assert_eq!(rows[0].created_at, 1);
    assert_eq!(rows[0].updated_at, 500);
}

#[tokio::test]
async fn test_missing_embeddings_anti_join() {
    let (_tmp, store) = setup().await;
    for (id, state, at) in [
        ("a", ModerationState::Approved, 1),
        ("b", ModerationState::Approved, 2),
        ("c", ModerationState::Pending, 3),
        ("d", ModerationState::Rejected, 4),
    ] {
        store
            .insert_contribution(&raw_contribution(id, "electrical", state, at))
            .await
            .unwrap();
    }

    let embedding = CorrectionEmbedding {
        contribution_id: "a".to_string(),
        trade_category: "electrical".to_string(),
        correction_kind: CorrectionKind::Description,
        embedded_text: "Trade: electrical".to_string(),
        embedding: vec![1.0, 0.0],
        model: "m".to_string(),
        quality_score: 0.9,
        is_high_quality: true,
        created_at: 10,
    };
    store.insert_embedding(&embedding).await.unwrap();
    // A second insert for the same contribution is ignored
    store
        .insert_embedding(&CorrectionEmbedding {
            embedding: vec![0.0, 1.0],
            ..embedding.clone()
        })
        .await
        .unwrap();

    let missing = store.contributions_missing_embedding(10).await.unwrap();
    let ids: Vec<&str> = missing.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["b"]);

    let recent = store.recent_embeddings("electrical", 5, false).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].embedding, vec![1.0, 0.0]);
}

#[tokio::test]
async fn test_trade_categories_include_calibrated() {
    let (_tmp, store) = setup().await;
    store
        .insert_contribution(&raw_contribution("a", "plumbing", ModerationState::Approved, 1))
        .await
        .unwrap();
    store
        .insert_contribution(&raw_contribution("b", "roofing", ModerationState::Pending, 2))
        .await
        .unwrap();
    store
        .upsert_thresholds(&ConfidenceThreshold {
            trade_category: "hvac".to_string(),
            low_threshold: 0.6,
            medium_threshold: 0.8,
            total_corrections: 0,
            high_confidence_corrections: 0,
            medium_confidence_corrections: 0,
            low_confidence_corrections: 0,
            last_calibrated_at: 1,
        })
        .await
        .unwrap();

    assert_eq!(
        store.trade_categories().await.unwrap(),
        vec!["hvac".to_string(), "plumbing".to_string()]
    );
}

#[tokio::test]
async fn test_threshold_ordering_enforced_by_schema() {
    let (_tmp, store) = setup().await;
    let result = store
        .upsert_thresholds(&ConfidenceThreshold {
            trade_category: "hvac".to_string(),
            low_threshold: 0.9,
            medium_threshold: 0.8,
            total_corrections: 0,
            high_confidence_corrections: 0,
            medium_confidence_corrections: 0,
            low_confidence_corrections: 0,
            last_calibrated_at: 1,
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_full_feedback_loop() {
    let (_tmp, store) = setup().await;

    for _ in 0..10 {
        submit_approved(
            &store,
            &correction("electrical", description("Cu wire", "Copper wire"), Some(0.85)),
        )
        .await;
    }
    for _ in 0..190 {
        submit_approved(
            &store,
            &correction(
                "electrical",
                CorrectionPayload::ExclusionFlag(Change::new(false, true)),
                Some(0.85),
            ),
        )
        .await;
    }
    submit_approved(
        &store,
        &correction("plumbing", description("PEX", "PEX tubing"), Some(0.5)),
    )
    .await;

    // Patterns
    let analyzer = PatternAnalyzer::new(store.clone(), 10);
    let report = analyzer.analyze(None).await.unwrap();
    assert_eq!(report.new.len(), 3);
    assert_eq!(report.promoted.len(), 2);
    assert_eq!(report.failed, 0);

    let rerun = analyzer.analyze(None).await.unwrap();
    assert!(rerun.new.is_empty() && rerun.updated.is_empty());
    assert_eq!(rerun.unchanged, 3);

    let active = active_patterns(store.as_ref(), "electrical").await.unwrap();
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].pattern_key, "false_to_true");
    assert_eq!(active[0].occurrence_count, 190);
    let rules = format_pattern_rules(&active);
    assert!(rules.contains("\"Cu wire\" as \"Copper wire\""));

    // Thresholds
    let calibrator = ThresholdCalibrator::new(store.clone(), CalibrationConfig::default());
    let summary = calibrator.calibrate_all(false).await.unwrap();
    assert_eq!(summary.total_processed, 2);
    assert_eq!(summary.updated, 1);
    let electrical = summary
        .results
        .iter()
        .find(|r| r.trade_category == "electrical")
        .unwrap();
    assert_eq!(electrical.reason, CalibrationReason::Calibrated);
    assert_eq!(electrical.suggested.medium, 0.95);
    assert_eq!(electrical.suggested.low, 0.75);
    let plumbing = summary
        .results
        .iter()
        .find(|r| r.trade_category == "plumbing")
        .unwrap();
    assert_eq!(plumbing.reason, CalibrationReason::InsufficientSamples);

    let stored = calibrator.get_thresholds("electrical").await;
    assert_eq!((stored.low, stored.medium), (0.75, 0.95));

    // Embeddings
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingProvider::new("hash-v1", 64));
    let indexer = EmbeddingIndexer::new(store.clone(), provider.clone());
    let indexed = indexer.drain(64, 10).await.unwrap();
    assert_eq!(indexed.processed, 201);
    assert_eq!(indexed.errors, 0);
    assert!(store.contributions_missing_embedding(10).await.unwrap().is_empty());

    // Retrieval
    let retriever = Retriever::new(store.clone(), provider);
    let examples = retriever
        .retrieve("plumbing", "PEX tubing supply", 5, false)
        .await;
    assert_eq!(examples.len(), 1);
    assert_eq!(examples[0].correction_kind, CorrectionKind::Description);
    assert!(examples[0].similarity > 0.0);

    let examples = retriever
        .retrieve("electrical", "copper wire", 8, false)
        .await;
    assert_eq!(examples.len(), 8);
    assert!(examples
        .windows(2)
        .all(|w| w[0].similarity >= w[1].similarity));
    assert_eq!(examples[0].correction_kind, CorrectionKind::Description);
    let block = format_examples_block(&examples);
    assert_eq!(block.matches("Example ").count(), 5);
}

#[tokio::test]
async fn test_ranked_search_skips_other_models_and_widths() {
    let (_tmp, store) = setup().await;
    let provider = HashingProvider::new("hash-v1", 8);
    for (id, at) in [("good", 1), ("stale", 2), ("legacy", 3)] {
        store
            .insert_contribution(&raw_contribution(id, "electrical", ModerationState::Approved, at))
            .await
            .unwrap();
    }

    let query = training_feedback::text::query_text("electrical", None, "copper wire");
    let vector = provider.embed_texts(&[query]).await.unwrap().remove(0);
    let row = |id: &str, model: &str, embedding: Vec<f32>, at: i64| CorrectionEmbedding {
        contribution_id: id.to_string(),
        trade_category: "electrical".to_string(),
        correction_kind: CorrectionKind::Description,
        embedded_text: "Trade: electrical".to_string(),
        embedding,
        model: model.to_string(),
        quality_score: 0.9,
        is_high_quality: true,
        created_at: at,
    };
    store.insert_embedding(&row("good", "hash-v1", vector.clone(), 1)).await.unwrap();
    store.insert_embedding(&row("stale", "hash-v1", vec![1.0; 4], 2)).await.unwrap();
    store.insert_embedding(&row("legacy", "older-model", vector.clone(), 3)).await.unwrap();

    let scored = store
        .similarity_search("electrical", "hash-v1", &vector, 5, false)
        .await
        .unwrap();
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0].embedding.contribution_id, "good");

    let retriever = Retriever::new(store.clone(), Arc::new(provider));
    let results = retriever.retrieve("electrical", "copper wire", 5, false).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].contribution_id, "good");
    assert!((results[0].similarity - 1.0).abs() < 1e-6);
}

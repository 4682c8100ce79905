use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Anonymized corrections and their moderation state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contributions (
            id TEXT PRIMARY KEY,
            trade_category TEXT NOT NULL,
            document_category TEXT NOT NULL,
            correction_kind TEXT NOT NULL CHECK (correction_kind IN
                ('description', 'category', 'price', 'exclusion_flag', 'quantity', 'unit')),
            original_value TEXT NOT NULL,
            corrected_value TEXT NOT NULL,
            redacted_text_snippet TEXT,
            original_confidence REAL,
            moderation_state TEXT NOT NULL DEFAULT 'pending' CHECK (moderation_state IN
                ('pending', 'approved', 'rejected')),
            contributed_at INTEGER NOT NULL,
            moderated_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Discovered correction rules
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pattern_refinements (
            trade_category TEXT NOT NULL,
            refinement_kind TEXT NOT NULL,
            pattern_key TEXT NOT NULL,
            pattern_value TEXT NOT NULL,
            occurrence_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 0,
            auto_promoted_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (trade_category, refinement_kind, pattern_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-category calibration state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS confidence_thresholds (
            trade_category TEXT PRIMARY KEY,
            low_threshold REAL NOT NULL,
            medium_threshold REAL NOT NULL,
            total_corrections INTEGER NOT NULL DEFAULT 0,
            high_confidence_corrections INTEGER NOT NULL DEFAULT 0,
            medium_confidence_corrections INTEGER NOT NULL DEFAULT 0,
            low_confidence_corrections INTEGER NOT NULL DEFAULT 0,
            last_calibrated_at INTEGER NOT NULL,
            CHECK (low_threshold < medium_threshold)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Semantic index, one row per approved contribution
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS correction_embeddings (
            contribution_id TEXT PRIMARY KEY,
            trade_category TEXT NOT NULL,
            correction_kind TEXT NOT NULL,
            embedded_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            quality_score REAL NOT NULL,
            is_high_quality INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (contribution_id) REFERENCES contributions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contributions_state_trade ON contributions(moderation_state, trade_category)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contributions_contributed_at ON contributions(contributed_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_patterns_active ON pattern_refinements(trade_category, is_active)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_trade_created ON correction_embeddings(trade_category, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

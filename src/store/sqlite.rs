//! SQLite-backed [`Store`] implementation.
//!
//! Payload values are stored as JSON text, embeddings as little-endian f32
//! BLOBs. Similarity search loads the category's vectors and ranks them
//! with cosine similarity in process.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::models::{
    ConfidenceThreshold, Contribution, CorrectionEmbedding, CorrectionPayload, ModerationState,
    PatternRefinement, PatternValue, ScoredEmbedding,
};

use super::Store;

const CONTRIBUTION_COLUMNS: &str = "c.id, c.trade_category, c.document_category, c.correction_kind, \
     c.original_value, c.corrected_value, c.redacted_text_snippet, c.original_confidence, \
     c.moderation_state, c.contributed_at, c.moderated_at";

const EMBEDDING_COLUMNS: &str = "contribution_id, trade_category, correction_kind, embedded_text, \
     embedding, model, quality_score, is_high_quality, created_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn contribution_from_row(row: &SqliteRow) -> Result<Contribution> {
    let kind: String = row.try_get("correction_kind")?;
    let original: String = row.try_get("original_value")?;
    let corrected: String = row.try_get("corrected_value")?;
    let state: String = row.try_get("moderation_state")?;

    Ok(Contribution {
        id: row.try_get("id")?,
        trade_category: row.try_get("trade_category")?,
        document_category: row.try_get("document_category")?,
        correction: CorrectionPayload::from_columns(kind.parse()?, &original, &corrected)?,
        redacted_text_snippet: row.try_get("redacted_text_snippet")?,
        original_confidence: row.try_get("original_confidence")?,
        moderation_state: state.parse()?,
        contributed_at: row.try_get("contributed_at")?,
        moderated_at: row.try_get("moderated_at")?,
    })
}

fn contributions_from_rows(rows: &[SqliteRow]) -> Result<Vec<Contribution>> {
    rows.iter().map(contribution_from_row).collect()
}

fn pattern_from_row(row: &SqliteRow) -> Result<PatternRefinement> {
    let kind: String = row.try_get("refinement_kind")?;
    let value: String = row.try_get("pattern_value")?;
    let pattern_value: PatternValue = serde_json::from_str(&value)?;

    Ok(PatternRefinement {
        trade_category: row.try_get("trade_category")?,
        refinement_kind: kind.parse()?,
        pattern_key: row.try_get("pattern_key")?,
        pattern_value,
        occurrence_count: row.try_get("occurrence_count")?,
        is_active: row.try_get("is_active")?,
        auto_promoted_at: row.try_get("auto_promoted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn embedding_from_row(row: &SqliteRow) -> Result<CorrectionEmbedding> {
    let kind: String = row.try_get("correction_kind")?;
    let blob: Vec<u8> = row.try_get("embedding")?;

    Ok(CorrectionEmbedding {
        contribution_id: row.try_get("contribution_id")?,
        trade_category: row.try_get("trade_category")?,
        correction_kind: kind.parse()?,
        embedded_text: row.try_get("embedded_text")?,
        embedding: blob_to_vec(&blob),
        model: row.try_get("model")?,
        quality_score: row.try_get("quality_score")?,
        is_high_quality: row.try_get("is_high_quality")?,
        created_at: row.try_get("created_at")?,
    })
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_contribution(&self, contribution: &Contribution) -> Result<()> {
        let (kind, original, corrected) = contribution.correction.to_columns()?;

        sqlx::query(
            r#"
            INSERT INTO contributions (id, trade_category, document_category, correction_kind,
                                       original_value, corrected_value, redacted_text_snippet,
                                       original_confidence, moderation_state, contributed_at,
                                       moderated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&contribution.id)
        .bind(&contribution.trade_category)
        .bind(&contribution.document_category)
        .bind(kind.as_str())
        .bind(&original)
        .bind(&corrected)
        .bind(&contribution.redacted_text_snippet)
        .bind(contribution.original_confidence)
        .bind(contribution.moderation_state.as_str())
        .bind(contribution.contributed_at)
        .bind(contribution.moderated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_contribution(&self, id: &str) -> Result<Option<Contribution>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contributions c WHERE c.id = ?",
            CONTRIBUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(contribution_from_row).transpose()
    }

    async fn list_contributions(
        &self,
        state: Option<ModerationState>,
        limit: usize,
    ) -> Result<Vec<Contribution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM contributions c \
             WHERE (?1 IS NULL OR c.moderation_state = ?1) \
             ORDER BY c.contributed_at DESC, c.id ASC LIMIT ?2",
            CONTRIBUTION_COLUMNS
        ))
        .bind(state.map(|s| s.as_str()))
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        contributions_from_rows(&rows)
    }

    async fn set_moderation_state(
        &self,
        id: &str,
        state: ModerationState,
        moderated_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE contributions SET moderation_state = ?, moderated_at = ? \
             WHERE id = ? AND moderation_state = 'pending'",
        )
        .bind(state.as_str())
        .bind(moderated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn approved_contributions(
        &self,
        trade_category: Option<&str>,
    ) -> Result<Vec<Contribution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM contributions c \
             WHERE c.moderation_state = 'approved' AND (?1 IS NULL OR c.trade_category = ?1) \
             ORDER BY c.contributed_at ASC, c.id ASC",
            CONTRIBUTION_COLUMNS
        ))
        .bind(trade_category)
        .fetch_all(&self.pool)
        .await?;

        contributions_from_rows(&rows)
    }

    async fn trade_categories(&self) -> Result<Vec<String>> {
        let categories: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT trade_category FROM contributions WHERE moderation_state = 'approved'
            UNION
            SELECT trade_category FROM confidence_thresholds
            ORDER BY trade_category
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    async fn list_patterns(
        &self,
        trade_category: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<PatternRefinement>> {
        let rows = sqlx::query(
            r#"
            SELECT trade_category, refinement_kind, pattern_key, pattern_value,
                   occurrence_count, is_active, auto_promoted_at, created_at, updated_at
            FROM pattern_refinements
            WHERE (?1 IS NULL OR trade_category = ?1) AND (?2 = 0 OR is_active = 1)
            ORDER BY occurrence_count DESC, pattern_key ASC
            "#,
        )
        .bind(trade_category)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pattern_from_row).collect()
    }

    async fn upsert_pattern(&self, pattern: &PatternRefinement) -> Result<()> {
        let value = serde_json::to_string(&pattern.pattern_value)?;

        sqlx::query(
            r#"
            INSERT INTO pattern_refinements (trade_category, refinement_kind, pattern_key,
                                             pattern_value, occurrence_count, is_active,
                                             auto_promoted_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trade_category, refinement_kind, pattern_key) DO UPDATE SET
                pattern_value = excluded.pattern_value,
                occurrence_count = MAX(pattern_refinements.occurrence_count, excluded.occurrence_count),
                is_active = MAX(pattern_refinements.is_active, excluded.is_active),
                auto_promoted_at = COALESCE(pattern_refinements.auto_promoted_at, excluded.auto_promoted_at),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pattern.trade_category)
        .bind(pattern.refinement_kind.as_str())
        .bind(&pattern.pattern_key)
        .bind(&value)
        .bind(pattern.occurrence_count)
        .bind(pattern.is_active)
        .bind(pattern.auto_promoted_at)
        .bind(pattern.created_at)
        .bind(pattern.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_thresholds(&self, trade_category: &str) -> Result<Option<ConfidenceThreshold>> {
        let row = sqlx::query(
            r#"
            SELECT trade_category, low_threshold, medium_threshold, total_corrections,
                   high_confidence_corrections, medium_confidence_corrections,
                   low_confidence_corrections, last_calibrated_at
            FROM confidence_thresholds WHERE trade_category = ?
            "#,
        )
        .bind(trade_category)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ConfidenceThreshold {
            trade_category: row.try_get("trade_category")?,
            low_threshold: row.try_get("low_threshold")?,
            medium_threshold: row.try_get("medium_threshold")?,
            total_corrections: row.try_get("total_corrections")?,
            high_confidence_corrections: row.try_get("high_confidence_corrections")?,
            medium_confidence_corrections: row.try_get("medium_confidence_corrections")?,
            low_confidence_corrections: row.try_get("low_confidence_corrections")?,
            last_calibrated_at: row.try_get("last_calibrated_at")?,
        }))
    }

    async fn upsert_thresholds(&self, t: &ConfidenceThreshold) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO confidence_thresholds (trade_category, low_threshold, medium_threshold,
                                               total_corrections, high_confidence_corrections,
                                               medium_confidence_corrections,
                                               low_confidence_corrections, last_calibrated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trade_category) DO UPDATE SET
                low_threshold = excluded.low_threshold,
                medium_threshold = excluded.medium_threshold,
                total_corrections = excluded.total_corrections,
                high_confidence_corrections = excluded.high_confidence_corrections,
                medium_confidence_corrections = excluded.medium_confidence_corrections,
                low_confidence_corrections = excluded.low_confidence_corrections,
                last_calibrated_at = excluded.last_calibrated_at
            "#,
        )
        .bind(&t.trade_category)
        .bind(t.low_threshold)
        .bind(t.medium_threshold)
        .bind(t.total_corrections)
        .bind(t.high_confidence_corrections)
        .bind(t.medium_confidence_corrections)
        .bind(t.low_confidence_corrections)
        .bind(t.last_calibrated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn contributions_missing_embedding(&self, limit: usize) -> Result<Vec<Contribution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM contributions c \
             LEFT JOIN correction_embeddings e ON e.contribution_id = c.id \
             WHERE c.moderation_state = 'approved' AND e.contribution_id IS NULL \
             ORDER BY c.contributed_at ASC, c.id ASC LIMIT ?",
            CONTRIBUTION_COLUMNS
        ))
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        contributions_from_rows(&rows)
    }

    async fn insert_embedding(&self, e: &CorrectionEmbedding) -> Result<()> {
        let blob = vec_to_blob(&e.embedding);

        sqlx::query(
            r#"
            INSERT INTO correction_embeddings (contribution_id, trade_category, correction_kind,
                                               embedded_text, embedding, model, dims,
                                               quality_score, is_high_quality, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(contribution_id) DO NOTHING
            "#,
        )
        .bind(&e.contribution_id)
        .bind(&e.trade_category)
        .bind(e.correction_kind.as_str())
        .bind(&e.embedded_text)
        .bind(&blob)
        .bind(&e.model)
        .bind(e.embedding.len() as i64)
        .bind(e.quality_score)
        .bind(e.is_high_quality)
        .bind(e.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn similarity_search(
        &self,
        trade_category: &str,
        model: &str,
        query_vec: &[f32],
        k: usize,
        high_quality_only: bool,
    ) -> Result<Vec<ScoredEmbedding>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM correction_embeddings \
             WHERE trade_category = ? AND model = ? AND dims = ? \
               AND (? = 0 OR is_high_quality = 1)",
            EMBEDDING_COLUMNS
        ))
        .bind(trade_category)
        .bind(model)
        .bind(query_vec.len() as i64)
        .bind(high_quality_only)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding = embedding_from_row(row)?;
            if embedding.embedding.len() != query_vec.len() {
                tracing::warn!(
                    contribution_id = %embedding.contribution_id,
                    stored = embedding.embedding.len(),
                    expected = query_vec.len(),
                    "skipping vector whose blob width disagrees with its dims column"
                );
                continue;
            }
            scored.push(ScoredEmbedding {
                similarity: cosine_similarity(query_vec, &embedding.embedding) as f64,
                embedding,
            });
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn recent_embeddings(
        &self,
        trade_category: &str,
        k: usize,
        high_quality_only: bool,
    ) -> Result<Vec<CorrectionEmbedding>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM correction_embeddings \
             WHERE trade_category = ? AND (? = 0 OR is_high_quality = 1) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
            EMBEDDING_COLUMNS
        ))
        .bind(trade_category)
        .bind(high_quality_only)
        .bind(limit_param(k))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(embedding_from_row).collect()
    }
}

//! Fixtures shared by the unit tests.

use async_trait::async_trait;

use crate::error::{FeedbackError, Result};
use crate::models::{
    Change, ConfidenceThreshold, Contribution, CorrectionEmbedding, CorrectionPayload,
    ModerationState, PatternRefinement, ScoredEmbedding,
};
use crate::store::{InMemoryStore, Store};

pub fn approved(id: &str, trade: &str, payload: CorrectionPayload, at: i64) -> Contribution {
    Contribution {
        id: id.to_string(),
        trade_category: trade.to_string(),
        document_category: "bid".to_string(),
        correction: payload,
        redacted_text_snippet: Some(format!("Line item context for contribution {}", id)),
        original_confidence: Some(0.7),
        moderation_state: ModerationState::Approved,
        contributed_at: at,
        moderated_at: Some(at + 1),
    }
}

pub fn description(from: &str, to: &str) -> CorrectionPayload {
    CorrectionPayload::Description(Change::new(from.to_string(), to.to_string()))
}

pub async fn seed(store: &dyn Store, contributions: &[Contribution]) {
    for c in contributions {
        store.insert_contribution(c).await.unwrap();
    }
}

/// In-memory store whose pattern table misbehaves on demand.
pub struct FlakyPatternStore {
    inner: InMemoryStore,
    failing_key: Option<String>,
    fail_listing: bool,
}

impl FlakyPatternStore {
    /// Writes for `key` fail; everything else works.
    pub fn failing_key(key: &str) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failing_key: Some(key.to_string()),
            fail_listing: false,
        }
    }

    /// Reading the pattern table fails.
    pub fn failing_listing() -> Self {
        Self {
            inner: InMemoryStore::new(),
            failing_key: None,
            fail_listing: true,
        }
    }
}

#[async_trait]
impl Store for FlakyPatternStore {
    async fn insert_contribution(&self, c: &Contribution) -> Result<()> {
        self.inner.insert_contribution(c).await
    }
    async fn get_contribution(&self, id: &str) -> Result<Option<Contribution>> {
        self.inner.get_contribution(id).await
    }
    async fn list_contributions(
        &self,
        state: Option<ModerationState>,
        limit: usize,
    ) -> Result<Vec<Contribution>> {
        self.inner.list_contributions(state, limit).await
    }
    async fn set_moderation_state(&self, id: &str, state: ModerationState, at: i64) -> Result<bool> {
        self.inner.set_moderation_state(id, state, at).await
    }
    async fn approved_contributions(&self, trade: Option<&str>) -> Result<Vec<Contribution>> {
        self.inner.approved_contributions(trade).await
    }
    async fn trade_categories(&self) -> Result<Vec<String>> {
        self.inner.trade_categories().await
    }
    async fn list_patterns(&self, trade: Option<&str>, active: bool) -> Result<Vec<PatternRefinement>> {
        if self.fail_listing {
            return Err(FeedbackError::Storage("pattern table is locked".to_string()));
        }
        self.inner.list_patterns(trade, active).await
    }
    async fn upsert_pattern(&self, p: &PatternRefinement) -> Result<()> {
        if self.failing_key.as_deref() == Some(p.pattern_key.as_str()) {
            return Err(FeedbackError::Storage("disk full".to_string()));
        }
        self.inner.upsert_pattern(p).await
    }
    async fn get_thresholds(&self, trade: &str) -> Result<Option<ConfidenceThreshold>> {
        self.inner.get_thresholds(trade).await
    }
    async fn upsert_thresholds(&self, t: &ConfidenceThreshold) -> Result<()> {
        self.inner.upsert_thresholds(t).await
    }
    async fn contributions_missing_embedding(&self, limit: usize) -> Result<Vec<Contribution>> {
        self.inner.contributions_missing_embedding(limit).await
    }
    async fn insert_embedding(&self, e: &CorrectionEmbedding) -> Result<()> {
        self.inner.insert_embedding(e).await
    }
    async fn similarity_search(
        &self,
        trade: &str,
        model: &str,
        q: &[f32],
        k: usize,
        hq: bool,
    ) -> Result<Vec<ScoredEmbedding>> {
        self.inner.similarity_search(trade, model, q, k, hq).await
    }
    async fn recent_embeddings(&self, trade: &str, k: usize, hq: bool) -> Result<Vec<CorrectionEmbedding>> {
        self.inner.recent_embeddings(trade, k, hq).await
    }
}

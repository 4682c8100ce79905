//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity. Ranked search can be switched off with
//! [`InMemoryStore::disable_similarity_search`] to exercise the recency
//! fallback of the retriever.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{FeedbackError, Result};
use crate::models::{
    ConfidenceThreshold, Contribution, CorrectionEmbedding, ModerationState, PatternRefinement,
    RefinementKind, ScoredEmbedding,
};

use super::Store;

type PatternKey = (String, RefinementKind, String);

/// In-memory store.
pub struct InMemoryStore {
    contributions: RwLock<Vec<Contribution>>,
    patterns: RwLock<HashMap<PatternKey, PatternRefinement>>,
    thresholds: RwLock<HashMap<String, ConfidenceThreshold>>,
    embeddings: RwLock<Vec<CorrectionEmbedding>>,
    similarity_search_enabled: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            contributions: RwLock::new(Vec::new()),
            patterns: RwLock::new(HashMap::new()),
            thresholds: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(Vec::new()),
            similarity_search_enabled: AtomicBool::new(true),
        }
    }

    /// Make [`Store::similarity_search`] fail, as a backend without a
    /// vector capability would.
    pub fn disable_similarity_search(&self) {
        self.similarity_search_enabled.store(false, Ordering::SeqCst);
    }

    pub fn embedding_count(&self) -> usize {
        self.embeddings.read().map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| FeedbackError::Storage("in-memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| FeedbackError::Storage("in-memory store lock poisoned".to_string()))
}

fn approved_sorted(contributions: &[Contribution], trade: Option<&str>) -> Vec<Contribution> {
    let mut rows: Vec<Contribution> = contributions
        .iter()
        .filter(|c| c.moderation_state == ModerationState::Approved)
        .filter(|c| trade.map_or(true, |t| c.trade_category == t))
        .cloned()
        .collect();
    rows.sort_by(|a, b| {
        a.contributed_at
            .cmp(&b.contributed_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    rows
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_contribution(&self, contribution: &Contribution) -> Result<()> {
        let mut rows = write(&self.contributions)?;
        if rows.iter().any(|c| c.id == contribution.id) {
            return Err(FeedbackError::Storage(format!(
                "contribution {} already exists",
                contribution.id
            )));
        }
        rows.push(contribution.clone());
        Ok(())
    }

    async fn get_contribution(&self, id: &str) -> Result<Option<Contribution>> {
        Ok(read(&self.contributions)?
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn list_contributions(
        &self,
        state: Option<ModerationState>,
        limit: usize,
    ) -> Result<Vec<Contribution>> {
        let rows = read(&self.contributions)?;
        let mut out: Vec<Contribution> = rows
            .iter()
            .filter(|c| state.map_or(true, |s| c.moderation_state == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.contributed_at
                .cmp(&a.contributed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn set_moderation_state(
        &self,
        id: &str,
        state: ModerationState,
        moderated_at: i64,
    ) -> Result<bool> {
        let mut rows = write(&self.contributions)?;
        match rows
            .iter_mut()
            .find(|c| c.id == id && c.moderation_state == ModerationState::Pending)
        {
            Some(row) => {
                row.moderation_state = state;
                row.moderated_at = Some(moderated_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn approved_contributions(
        &self,
        trade_category: Option<&str>,
    ) -> Result<Vec<Contribution>> {
        Ok(approved_sorted(&read(&self.contributions)?, trade_category))
    }

    async fn trade_categories(&self) -> Result<Vec<String>> {
        let mut categories: BTreeSet<String> = read(&self.contributions)?
            .iter()
            .filter(|c| c.moderation_state == ModerationState::Approved)
            .map(|c| c.trade_category.clone())
            .collect();
        categories.extend(read(&self.thresholds)?.keys().cloned());
        Ok(categories.into_iter().collect())
    }

    async fn list_patterns(
        &self,
        trade_category: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<PatternRefinement>> {
        let patterns = read(&self.patterns)?;
        let mut out: Vec<PatternRefinement> = patterns
            .values()
            .filter(|p| trade_category.map_or(true, |t| p.trade_category == t))
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.occurrence_count
                .cmp(&a.occurrence_count)
                .then_with(|| a.pattern_key.cmp(&b.pattern_key))
        });
        Ok(out)
    }

    async fn upsert_pattern(&self, pattern: &PatternRefinement) -> Result<()> {
        let key = (
            pattern.trade_category.clone(),
            pattern.refinement_kind,
            pattern.pattern_key.clone(),
        );
        let mut patterns = write(&self.patterns)?;
        match patterns.get_mut(&key) {
            Some(existing) => {
                existing.pattern_value = pattern.pattern_value.clone();
                existing.occurrence_count = existing.occurrence_count.max(pattern.occurrence_count);
                existing.is_active = existing.is_active || pattern.is_active;
                existing.auto_promoted_at = existing.auto_promoted_at.or(pattern.auto_promoted_at);
                existing.updated_at = pattern.updated_at;
            }
            None => {
                patterns.insert(key, pattern.clone());
            }
        }
        Ok(())
    }

    async fn get_thresholds(&self, trade_category: &str) -> Result<Option<ConfidenceThreshold>> {
        Ok(read(&self.thresholds)?.get(trade_category).cloned())
    }

    async fn upsert_thresholds(&self, thresholds: &ConfidenceThreshold) -> Result<()> {
        write(&self.thresholds)?.insert(thresholds.trade_category.clone(), thresholds.clone());
        Ok(())
    }

    async fn contributions_missing_embedding(&self, limit: usize) -> Result<Vec<Contribution>> {
        let embeddings = read(&self.embeddings)?;
        let mut rows = approved_sorted(&read(&self.contributions)?, None);
        rows.retain(|c| !embeddings.iter().any(|e| e.contribution_id == c.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_embedding(&self, embedding: &CorrectionEmbedding) -> Result<()> {
        let mut rows = write(&self.embeddings)?;
        if !rows
            .iter()
            .any(|e| e.contribution_id == embedding.contribution_id)
        {
            rows.push(embedding.clone());
        }
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
        if !self.similarity_search_enabled.load(Ordering::SeqCst) {
            return Err(FeedbackError::Storage(
                "similarity search is not available on this store".to_string(),
            ));
        }
        let rows = read(&self.embeddings)?;
        let mut scored: Vec<ScoredEmbedding> = rows
            .iter()
            .filter(|e| e.trade_category == trade_category)
            .filter(|e| e.model == model && e.embedding.len() == query_vec.len())
            .filter(|e| !high_quality_only || e.is_high_quality)
            .map(|e| ScoredEmbedding {
                similarity: cosine_similarity(query_vec, &e.embedding) as f64,
                embedding: e.clone(),
            })
            .collect();
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
        let rows = read(&self.embeddings)?;
        // Newest first; insertion order breaks timestamp ties.
        let mut recent: Vec<(usize, &CorrectionEmbedding)> = rows
            .iter()
            .enumerate()
            .filter(|(_, e)| e.trade_category == trade_category)
            .filter(|(_, e)| !high_quality_only || e.is_high_quality)
            .collect();
        recent.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(recent.into_iter().take(k).map(|(_, e)| e.clone()).collect())
    }
}

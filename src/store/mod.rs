//! Storage abstraction for the feedback loop.
//!
//! The [`Store`] trait covers the four tables the pipeline touches. The
//! analyzer, calibrator and indexer only read `contributions`, and each
//! writes to its own target table, so they can run side by side.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    ConfidenceThreshold, Contribution, CorrectionEmbedding, ModerationState, PatternRefinement,
    ScoredEmbedding,
};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend.
///
/// | Method | Table |
/// |--------|-------|
/// | [`insert_contribution`](Store::insert_contribution) | contributions |
/// | [`set_moderation_state`](Store::set_moderation_state) | contributions |
/// | [`approved_contributions`](Store::approved_contributions) | contributions |
/// | [`upsert_pattern`](Store::upsert_pattern) | pattern_refinements |
/// | [`upsert_thresholds`](Store::upsert_thresholds) | confidence_thresholds |
/// | [`contributions_missing_embedding`](Store::contributions_missing_embedding) | contributions ⋉ correction_embeddings |
/// | [`insert_embedding`](Store::insert_embedding) | correction_embeddings |
/// | [`similarity_search`](Store::similarity_search) | correction_embeddings |
#[async_trait]
pub trait Store: Send + Sync {
    /// Append a new contribution.
    async fn insert_contribution(&self, contribution: &Contribution) -> Result<()>;

    async fn get_contribution(&self, id: &str) -> Result<Option<Contribution>>;

    /// List contributions, newest first, optionally filtered by state.
    async fn list_contributions(
        &self,
        state: Option<ModerationState>,
        limit: usize,
    ) -> Result<Vec<Contribution>>;

    /// Move a contribution out of `pending`.
    ///
    /// Returns `false` without writing if the row is not pending (or does
    /// not exist); callers distinguish the two with [`Store::get_contribution`].
    async fn set_moderation_state(
        &self,
        id: &str,
        state: ModerationState,
        moderated_at: i64,
    ) -> Result<bool>;

    /// All approved contributions, oldest first (ties broken by id).
    async fn approved_contributions(&self, trade_category: Option<&str>)
        -> Result<Vec<Contribution>>;

    /// Trade categories that have approved contributions or stored thresholds.
    async fn trade_categories(&self) -> Result<Vec<String>>;

    async fn list_patterns(
        &self,
        trade_category: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<PatternRefinement>>;

    /// Insert or merge a refinement.
    ///
    /// The stored count becomes the larger of the stored and supplied counts,
    /// `is_active` is OR-ed, and an existing promotion timestamp is kept.
    async fn upsert_pattern(&self, pattern: &PatternRefinement) -> Result<()>;

    async fn get_thresholds(&self, trade_category: &str) -> Result<Option<ConfidenceThreshold>>;

    async fn upsert_thresholds(&self, thresholds: &ConfidenceThreshold) -> Result<()>;

    /// Approved contributions with no embedding row, oldest first.
    async fn contributions_missing_embedding(&self, limit: usize) -> Result<Vec<Contribution>>;

    /// Store the embedding for a contribution. A contribution is indexed once;
    /// a second insert for the same id is ignored.
    async fn insert_embedding(&self, embedding: &CorrectionEmbedding) -> Result<()>;

    /// Cosine-ranked search within a trade category.
    ///
    /// Only rows embedded by `model` at the query's width are ranked.
    async fn similarity_search(
        &self,
        trade_category: &str,
        model: &str,
        query_vec: &[f32],
        k: usize,
        high_quality_only: bool,
    ) -> Result<Vec<ScoredEmbedding>>;

    /// Most recently indexed rows for a trade category.
    async fn recent_embeddings(
        &self,
        trade_category: &str,
        k: usize,
        high_quality_only: bool,
    ) -> Result<Vec<CorrectionEmbedding>>;
}

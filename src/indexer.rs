//! Embedding indexer for approved contributions.
//!
//! Each run selects approved contributions that have no row in
//! `correction_embeddings` (one anti-join query), renders them with
//! [`text::embedded_text`], embeds them and stores one
//! [`CorrectionEmbedding`] per contribution. Rows are never rewritten: a
//! contribution is indexed exactly once.
//!
//! The batch is sent to the provider in one request. If that request
//! fails, the items are retried one at a time so a single bad input only
//! costs itself.

use std::sync::Arc;

use anyhow::{bail, Result as AnyResult};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{FeedbackError, Result};
use crate::models::{Contribution, CorrectionEmbedding};
use crate::store::Store;
use crate::text;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    /// Contributions picked up from the backlog.
    pub selected: usize,
    /// Embeddings written.
    pub processed: usize,
    /// Contributions that failed to embed or persist.
    pub errors: usize,
    pub batches: usize,
}

impl IndexReport {
    fn absorb(&mut self, other: IndexReport) {
        self.selected += other.selected;
        self.processed += other.processed;
        self.errors += other.errors;
        self.batches += other.batches;
    }
}

pub struct EmbeddingIndexer {
    store: Arc<dyn Store>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingIndexer {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, provider }
    }

    /// Index up to `batch_size` pending contributions.
    ///
    /// Per-item failures are logged and counted in
    /// [`IndexReport::errors`]. Only a failure to read the backlog is
    /// returned as an error.
    pub async fn index_batch(&self, batch_size: usize) -> Result<IndexReport> {
        let pending = self
            .store
            .contributions_missing_embedding(batch_size)
            .await?;
        let mut report = IndexReport {
            selected: pending.len(),
            batches: 1,
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let texts: Vec<String> = pending.iter().map(text::embedded_text).collect();
        let vectors = self.embed_batch(&texts).await;

        for ((contribution, embedded_text), vector) in pending.iter().zip(texts).zip(vectors) {
            let result = match vector {
                Ok(vector) => self.persist(contribution, embedded_text, vector).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    tracing::warn!(id = %contribution.id, "failed to index contribution: {}", e);
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            selected = report.selected,
            processed = report.processed,
            errors = report.errors,
            "indexer batch finished"
        );
        Ok(report)
    }

    /// Run batches until the backlog is empty, a batch makes no progress,
    /// or `max_batches` have run.
    pub async fn drain(&self, batch_size: usize, max_batches: usize) -> Result<IndexReport> {
        let mut total = IndexReport::default();
        for _ in 0..max_batches {
            let report = self.index_batch(batch_size).await?;
            total.absorb(report);
            if report.selected == 0 || report.processed == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// One vector result per text, in order.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        match self.provider.embed_texts(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                return vectors.into_iter().map(|v| self.check_dims(v)).collect();
            }
            Ok(vectors) => tracing::warn!(
                expected = texts.len(),
                got = vectors.len(),
                "provider returned the wrong number of vectors, retrying one by one"
            ),
            Err(e) => tracing::warn!("batch embedding failed, retrying one by one: {}", e),
        }

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(embedding::embed_one(self.provider.as_ref(), text).await);
        }
        out
    }

    fn check_dims(&self, vector: Vec<f32>) -> Result<Vec<f32>> {
        if vector.len() != self.provider.dims() {
            return Err(FeedbackError::ExternalService(format!(
                "{} returned {} dimensions, expected {}",
                self.provider.model_name(),
                vector.len(),
                self.provider.dims()
            )));
        }
        Ok(vector)
    }

    async fn persist(
        &self,
        contribution: &Contribution,
        embedded_text: String,
        vector: Vec<f32>,
    ) -> Result<()> {
        let quality_score = text::quality_score(contribution);
        self.store
            .insert_embedding(&CorrectionEmbedding {
                contribution_id: contribution.id.clone(),
                trade_category: contribution.trade_category.clone(),
                correction_kind: contribution.kind(),
                embedded_text,
                embedding: vector,
                model: self.provider.model_name().to_string(),
                quality_score,
                is_high_quality: text::is_high_quality(quality_score),
                created_at: chrono::Utc::now().timestamp(),
            })
            .await
    }
}

/// Embed approved contributions that are not yet indexed.
pub async fn run_embed_pending(
    config: &Config,
    batch_size_override: Option<usize>,
    drain: bool,
    max_batches: usize,
) -> AnyResult<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    let store = Arc::new(db::open_store(config).await?);
    let indexer = EmbeddingIndexer::new(store.clone(), provider);
    let batch_size = batch_size_override.unwrap_or(config.indexer.batch_size);

    let report = if drain {
        indexer.drain(batch_size, max_batches).await?
    } else {
        indexer.index_batch(batch_size).await?
    };

    println!("embed pending");
    println!("  batches: {}", report.batches);
    println!("  selected: {}", report.selected);
    println!("  embedded: {}", report.processed);
    println!("  failed: {}", report.errors);

    store.pool().close().await;
    Ok(())
}

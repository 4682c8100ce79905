//! Few-shot retrieval of similar past corrections.
//!
//! Retrieval never fails the caller. If the query cannot be embedded or
//! the ranked search errors, the most recent corrections for the trade
//! category are returned with similarity `0.0`; if that also fails the
//! result is empty.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::Result;
use crate::models::{CorrectionEmbedding, CorrectionKind};
use crate::store::Store;
use crate::text;

/// Most examples rendered into one prompt block.
pub const MAX_PROMPT_EXAMPLES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedExample {
    pub contribution_id: String,
    pub correction_kind: CorrectionKind,
    pub embedded_text: String,
    pub quality_score: f64,
    pub similarity: f64,
}

impl RetrievedExample {
    fn from_embedding(e: CorrectionEmbedding, similarity: f64) -> Self {
        Self {
            contribution_id: e.contribution_id,
            correction_kind: e.correction_kind,
            embedded_text: e.embedded_text,
            quality_score: e.quality_score,
            similarity,
        }
    }
}

pub struct Retriever {
    store: Arc<dyn Store>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, provider }
    }

    /// Up to `k` prior corrections in `trade_category` closest to `query`,
    /// most similar first.
    pub async fn retrieve(
        &self,
        trade_category: &str,
        query: &str,
        k: usize,
        high_quality_only: bool,
    ) -> Vec<RetrievedExample> {
        self.retrieve_for_kind(trade_category, None, query, k, high_quality_only)
            .await
    }

    /// Like [`retrieve`](Self::retrieve), with the correction kind the
    /// caller is about to make folded into the query text.
    pub async fn retrieve_for_kind(
        &self,
        trade_category: &str,
        kind: Option<CorrectionKind>,
        query: &str,
        k: usize,
        high_quality_only: bool,
    ) -> Vec<RetrievedExample> {
        if k == 0 {
            return Vec::new();
        }

        match self
            .ranked(trade_category, kind, query, k, high_quality_only)
            .await
        {
            Ok(examples) => return examples,
            Err(e) => tracing::warn!(
                trade = trade_category,
                "similarity search failed, falling back to recent corrections: {}",
                e
            ),
        }

        match self
            .store
            .recent_embeddings(trade_category, k, high_quality_only)
            .await
        {
            Ok(rows) => rows
                .into_iter()
                .map(|e| RetrievedExample::from_embedding(e, 0.0))
                .collect(),
            Err(e) => {
                tracing::warn!(trade = trade_category, "recency fallback failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn ranked(
        &self,
        trade_category: &str,
        kind: Option<CorrectionKind>,
        query: &str,
        k: usize,
        high_quality_only: bool,
    ) -> Result<Vec<RetrievedExample>> {
        let query_text = text::query_text(trade_category, kind, query);
        let vector = embedding::embed_one(self.provider.as_ref(), &query_text).await?;
        let scored = self
            .store
            .similarity_search(
                trade_category,
                self.provider.model_name(),
                &vector,
                k,
                high_quality_only,
            )
            .await?;
        Ok(scored
            .into_iter()
            .map(|s| RetrievedExample::from_embedding(s.embedding, s.similarity))
            .collect())
    }
}

/// Render retrieved examples as a few-shot block for an extraction prompt.
///
/// At most [`MAX_PROMPT_EXAMPLES`] are rendered, each tagged with its
/// correction kind. Returns an empty string for no examples.
pub fn format_examples_block(examples: &[RetrievedExample]) -> String {
    if examples.is_empty() {
        return String::new();
    }

    let mut out = String::from("Similar past corrections:\n");
    for (i, example) in examples.iter().take(MAX_PROMPT_EXAMPLES).enumerate() {
        out.push_str(&format!(
            "\nExample {} [{}]:\n{}\n",
            i + 1,
            example.correction_kind,
            example.embedded_text
        ));
    }
    out
}

pub async fn run_retrieve(
    config: &Config,
    trade: &str,
    kind: Option<CorrectionKind>,
    query: &str,
    k: Option<usize>,
    high_quality_only: bool,
) -> AnyResult<()> {
    let provider: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    let store = Arc::new(db::open_store(config).await?);
    let retriever = Retriever::new(store.clone(), provider);

    let k = k.unwrap_or(config.retrieval.k);
    let hq = high_quality_only || config.retrieval.high_quality_only;
    let examples = retriever
        .retrieve_for_kind(trade, kind, query, k, hq)
        .await;

    if examples.is_empty() {
        println!("No similar corrections.");
    } else {
        for (i, e) in examples.iter().enumerate() {
            println!(
                "{}. [{:.2}] {} {} (quality {:.2})",
                i + 1,
                e.similarity,
                e.contribution_id,
                e.correction_kind,
                e.quality_score
            );
        }
        println!();
        let shown = examples
            .iter()
            .take(config.retrieval.max_prompt_examples.min(MAX_PROMPT_EXAMPLES))
            .cloned()
            .collect::<Vec<_>>();
        print!("{}", format_examples_block(&shown));
    }

    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledProvider, HashingProvider};
    use crate::indexer::EmbeddingIndexer;
    use crate::models::{Change, CorrectionPayload};
    use crate::store::InMemoryStore;
    use crate::testutil::{approved, description, seed};

    fn hashing() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingProvider::new("hash-test", 128))
    }

    async fn indexed_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let mut low_quality = approved(
            "c-unit",
            "electrical",
            CorrectionPayload::Unit(Change::new("ea".to_string(), "ea".to_string())),
            3,
        );
        low_quality.redacted_text_snippet = None;
        low_quality.original_confidence = None;
        seed(
            store.as_ref(),
            &[
                approved("c-wire", "electrical", description("Cu wire", "Copper wire THHN"), 1),
                approved("c-panel", "electrical", description("Panel bd", "Panel board 200A"), 2),
                low_quality,
                approved("c-pipe", "plumbing", description("PEX", "PEX tubing"), 4),
            ],
        )
        .await;
        EmbeddingIndexer::new(store.clone(), hashing())
            .index_batch(10)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_nearest_first_within_trade() {
        let store = indexed_store().await;
        let retriever = Retriever::new(store.clone(), hashing());

        let results = retriever
            .retrieve("electrical", "copper wire THHN", 5, false)
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].contribution_id, "c-wire");
        assert!(results[0].similarity > results[1].similarity);
        assert!(results.iter().all(|r| r.contribution_id != "c-pipe"));
    }

    #[tokio::test]
    async fn test_high_quality_filter() {
        let store = indexed_store().await;
        let retriever = Retriever::new(store.clone(), hashing());

        let results = retriever.retrieve("electrical", "wire", 5, true).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.contribution_id != "c-unit"));
    }

    #[tokio::test]
    async fn test_falls_back_to_recent_without_vector_search() {
        let store = indexed_store().await;
        store.disable_similarity_search();
        let retriever = Retriever::new(store.clone(), hashing());

        let results = retriever.retrieve("electrical", "copper", 2, false).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.similarity == 0.0));
    }

    #[tokio::test]
    async fn test_falls_back_when_query_cannot_be_embedded() {
        let store = indexed_store().await;
        let retriever = Retriever::new(store.clone(), Arc::new(DisabledProvider));

        let results = retriever.retrieve("electrical", "copper", 5, false).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.similarity == 0.0));
    }

    #[tokio::test]
    async fn test_kind_narrows_toward_matching_corrections() {
        let store = indexed_store().await;
        let retriever = Retriever::new(store.clone(), hashing());

        let results = retriever
            .retrieve_for_kind("electrical", Some(CorrectionKind::Description), "copper wire", 3, false)
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].contribution_id, "c-wire");
        assert_eq!(results[0].correction_kind, CorrectionKind::Description);
    }

    #[tokio::test]
    async fn test_stale_vectors_do_not_disable_ranking() {
        let store = indexed_store().await;
        for (model, width) in [("hash-test", 32), ("older-model", 128)] {
            store
                .insert_embedding(&CorrectionEmbedding {
                    contribution_id: format!("c-legacy-{}", width),
                    trade_category: "electrical".to_string(),
                    correction_kind: CorrectionKind::Description,
                    embedded_text: "Trade: electrical".to_string(),
                    embedding: vec![1.0; width],
                    model: model.to_string(),
                    quality_score: 0.9,
                    is_high_quality: true,
                    created_at: 100,
                })
                .await
                .unwrap();
        }
        let retriever = Retriever::new(store.clone(), hashing());

        let results = retriever
            .retrieve("electrical", "copper wire THHN", 5, false)
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].contribution_id, "c-wire");
        assert!(results[0].similarity > 0.0);
        assert!(results.iter().all(|r| !r.contribution_id.starts_with("c-legacy")));
    }

    #[tokio::test]
    async fn test_unknown_trade_is_empty() {
        let store = indexed_store().await;
        let retriever = Retriever::new(store.clone(), hashing());
        assert!(retriever.retrieve("masonry", "brick", 5, false).await.is_empty());
    }

    #[test]
    fn test_format_examples_block_caps_and_tags() {
        assert_eq!(format_examples_block(&[]), "");

        let examples: Vec<RetrievedExample> = (0..7)
            .map(|i| RetrievedExample {
                contribution_id: format!("c-{}", i),
                correction_kind: CorrectionKind::Category,
                embedded_text: format!("Trade: electrical\nCorrection: category\nOriginal: a{}", i),
                quality_score: 0.9,
                similarity: 0.5,
            })
            .collect();
        let block = format_examples_block(&examples);
        assert!(block.starts_with("Similar past corrections:\n"));
        assert!(block.contains("Example 1 [category]:"));
        assert!(block.contains("Example 5 [category]:"));
        assert!(!block.contains("Example 6"));
    }
}

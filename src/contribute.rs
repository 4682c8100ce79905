//! Contribution intake and moderation.
//!
//! Upstream hands over a [`NewCorrection`] per changed line-item field.
//! [`submit_correction`] validates and anonymizes it and stores a pending
//! [`Contribution`]; a moderator later approves or rejects it with
//! [`moderate`]. Only approved contributions reach the analyzer, the
//! calibrator and the indexer.

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use serde::Deserialize;

use crate::anonymize::Anonymizer;
use crate::config::Config;
use crate::db;
use crate::error::{FeedbackError, Result};
use crate::models::{
    Change, Contribution, CorrectionPayload, ModerationState, NewCorrection, PriceValue,
};
use crate::store::Store;

/// A moderator's verdict on a pending contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn target_state(self) -> ModerationState {
        match self {
            Decision::Approve => ModerationState::Approved,
            Decision::Reject => ModerationState::Rejected,
        }
    }
}

/// A line item as extracted from a bid document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub is_excluded: bool,
}

/// Validate, anonymize and store a correction as a pending contribution.
///
/// # Errors
///
/// [`FeedbackError::Validation`] if the correction is malformed; storage
/// errors are passed through.
pub async fn submit_correction(
    store: &dyn Store,
    anonymizer: &Anonymizer,
    correction: &NewCorrection,
) -> Result<Contribution> {
    correction.validate()?;
    let redacted = anonymizer.anonymize(correction);

    let contribution = Contribution {
        id: uuid::Uuid::new_v4().to_string(),
        trade_category: redacted.trade_category.trim().to_string(),
        document_category: redacted.document_category.trim().to_string(),
        correction: redacted.correction,
        redacted_text_snippet: redacted.text_snippet,
        original_confidence: redacted.original_confidence,
        moderation_state: ModerationState::Pending,
        contributed_at: chrono::Utc::now().timestamp(),
        moderated_at: None,
    };

    store.insert_contribution(&contribution).await?;
    tracing::debug!(
        id = %contribution.id,
        trade = %contribution.trade_category,
        kind = %contribution.kind(),
        "stored pending contribution"
    );
    Ok(contribution)
}

/// Apply a moderation decision to a pending contribution.
///
/// # Errors
///
/// [`FeedbackError::NotFound`] for an unknown id, and
/// [`FeedbackError::Validation`] if the contribution was already moderated.
pub async fn moderate(store: &dyn Store, id: &str, decision: Decision) -> Result<Contribution> {
    let now = chrono::Utc::now().timestamp();
    let changed = store
        .set_moderation_state(id, decision.target_state(), now)
        .await?;

    let current = store
        .get_contribution(id)
        .await?
        .ok_or_else(|| FeedbackError::NotFound(format!("contribution {}", id)))?;

    if !changed {
        return Err(FeedbackError::Validation(format!(
            "contribution {} is already {}",
            id, current.moderation_state
        )));
    }
    Ok(current)
}

/// Pending contributions, newest first.
pub async fn list_pending(store: &dyn Store, limit: usize) -> Result<Vec<Contribution>> {
    store
        .list_contributions(Some(ModerationState::Pending), limit)
        .await
}

/// Compare an extracted line item with its reviewed version and emit one
/// typed correction per changed field.
///
/// Text fields are compared after trimming; prices are compared exactly.
pub fn diff_line_items(original: &LineItem, corrected: &LineItem) -> Vec<CorrectionPayload> {
    let mut out = Vec::new();

    if let Some(change) = text_change(&original.description, &corrected.description) {
        out.push(CorrectionPayload::Description(change));
    }
    if let Some(change) = text_change(&original.category, &corrected.category) {
        out.push(CorrectionPayload::Category(change));
    }
    if original.unit_price != corrected.unit_price || original.total_price != corrected.total_price
    {
        out.push(CorrectionPayload::Price(Change::new(
            PriceValue {
                unit_price: original.unit_price,
                total_price: original.total_price,
                ..Default::default()
            },
            PriceValue {
                unit_price: corrected.unit_price,
                total_price: corrected.total_price,
                ..Default::default()
            },
        )));
    }
    if original.is_excluded != corrected.is_excluded {
        out.push(CorrectionPayload::ExclusionFlag(Change::new(
            original.is_excluded,
            corrected.is_excluded,
        )));
    }
    if original.quantity != corrected.quantity {
        out.push(CorrectionPayload::Quantity(Change::new(
            original.quantity.map(|q| q.to_string()).unwrap_or_default(),
            corrected.quantity.map(|q| q.to_string()).unwrap_or_default(),
        )));
    }
    let (o_unit, c_unit) = (
        original.unit.as_deref().unwrap_or(""),
        corrected.unit.as_deref().unwrap_or(""),
    );
    if let Some(change) = text_change(o_unit, c_unit) {
        out.push(CorrectionPayload::Unit(change));
    }

    out
}

fn text_change(original: &str, corrected: &str) -> Option<Change<String>> {
    let (o, c) = (original.trim(), corrected.trim());
    (o != c).then(|| Change::new(o.to_string(), c.to_string()))
}

/// Input accepted by `tfb contribute`: one correction or a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum ContributionInput {
    Many(Vec<NewCorrection>),
    One(Box<NewCorrection>),
}

/// Read corrections from a JSON file and store them as pending.
pub async fn run_contribute(config: &Config, path: &Path) -> AnyResult<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let input: ContributionInput = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse corrections in {}", path.display()))?;
    let corrections = match input {
        ContributionInput::Many(list) => list,
        ContributionInput::One(one) => vec![*one],
    };

    let anonymizer = Anonymizer::from_config(&config.anonymizer)?;
    let store = db::open_store(config).await?;

    let mut stored = 0u64;
    let mut rejected = 0u64;
    for correction in &corrections {
        match submit_correction(&store, &anonymizer, correction).await {
            Ok(c) => {
                println!("  {}  {:<16} {}", c.id, c.trade_category, c.kind());
                stored += 1;
            }
            Err(FeedbackError::Validation(msg)) => {
                tracing::warn!("skipping invalid correction: {}", msg);
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("contribute");
    println!("  stored: {}", stored);
    println!("  invalid: {}", rejected);

    store.pool().close().await;
    Ok(())
}

pub async fn run_pending(config: &Config, limit: usize) -> AnyResult<()> {
    let store = db::open_store(config).await?;
    let pending = list_pending(&store, limit).await?;

    if pending.is_empty() {
        println!("No pending contributions.");
    } else {
        println!(
            "{:<36}  {:<16} {:<14} {}",
            "ID", "TRADE", "KIND", "SNIPPET"
        );
        for c in &pending {
            let snippet = c
                .redacted_text_snippet
                .as_deref()
                .map(|s| crate::anonymize::truncate_chars(s, 60))
                .unwrap_or_default();
            println!(
                "{:<36}  {:<16} {:<14} {}",
                c.id,
                c.trade_category,
                c.kind(),
                snippet.replace('\n', " ")
            );
        }
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_moderate(config: &Config, id: &str, decision: Decision) -> AnyResult<()> {
    let store = db::open_store(config).await?;
    let contribution = moderate(&store, id, decision)
        .await
        .with_context(|| format!("Failed to moderate {}", id))?;

    println!("{} -> {}", contribution.id, contribution.moderation_state);

    store.pool().close().await;
    Ok(())
}

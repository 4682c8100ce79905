//! Core data models for the feedback loop.
//!
//! A reviewer correction arrives as a [`NewCorrection`], is anonymized and
//! stored as a [`Contribution`], and approved contributions are mined into
//! [`PatternRefinement`]s, [`ConfidenceThreshold`]s and
//! [`CorrectionEmbedding`]s.
//!
//! [`CorrectionKind`] is the single enumeration of correction kinds. The
//! anonymizer, pattern analyzer and embedding text builder all match on
//! [`CorrectionPayload`] exhaustively, so adding a kind is a compile error
//! until every consumer handles it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FeedbackError, Result};

/// Which field of an extracted line item the reviewer changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    Description,
    Category,
    Price,
    ExclusionFlag,
    Quantity,
    Unit,
}

impl CorrectionKind {
    pub const ALL: [CorrectionKind; 6] = [
        CorrectionKind::Description,
        CorrectionKind::Category,
        CorrectionKind::Price,
        CorrectionKind::ExclusionFlag,
        CorrectionKind::Quantity,
        CorrectionKind::Unit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionKind::Description => "description",
            CorrectionKind::Category => "category",
            CorrectionKind::Price => "price",
            CorrectionKind::ExclusionFlag => "exclusion_flag",
            CorrectionKind::Quantity => "quantity",
            CorrectionKind::Unit => "unit",
        }
    }
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionKind {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self> {
        CorrectionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| FeedbackError::Validation(format!("unknown correction kind: '{}'", s)))
    }
}

/// An original/corrected value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change<T> {
    pub original: T,
    pub corrected: T,
}

impl<T> Change<T> {
    pub fn new(original: T, corrected: T) -> Self {
        Self {
            original,
            corrected,
        }
    }
}

/// Price magnitude bucket. Boundaries are closed on the low end, so a
/// price of exactly 500 is `500-1K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceBucket {
    #[serde(rename = "<500")]
    Under500,
    #[serde(rename = "500-1K")]
    From500To1K,
    #[serde(rename = "1K-5K")]
    From1KTo5K,
    #[serde(rename = "5K-10K")]
    From5KTo10K,
    #[serde(rename = "10K-25K")]
    From10KTo25K,
    #[serde(rename = "25K-50K")]
    From25KTo50K,
    #[serde(rename = "50K-100K")]
    From50KTo100K,
    #[serde(rename = "100K-250K")]
    From100KTo250K,
    #[serde(rename = "250K-500K")]
    From250KTo500K,
    #[serde(rename = "500K-1M")]
    From500KTo1M,
    #[serde(rename = ">1M")]
    Over1M,
}

impl PriceBucket {
    /// Lower bounds, ascending. The last bucket is unbounded above.
    const LOWER_BOUNDS: [(f64, PriceBucket); 11] = [
        (0.0, PriceBucket::Under500),
        (500.0, PriceBucket::From500To1K),
        (1_000.0, PriceBucket::From1KTo5K),
        (5_000.0, PriceBucket::From5KTo10K),
        (10_000.0, PriceBucket::From10KTo25K),
        (25_000.0, PriceBucket::From25KTo50K),
        (50_000.0, PriceBucket::From50KTo100K),
        (100_000.0, PriceBucket::From100KTo250K),
        (250_000.0, PriceBucket::From250KTo500K),
        (500_000.0, PriceBucket::From500KTo1M),
        (1_000_000.0, PriceBucket::Over1M),
    ];

    /// Map an amount to its bucket. Negative and NaN amounts fall into `<500`.
    pub fn for_amount(amount: f64) -> PriceBucket {
        let mut bucket = PriceBucket::Under500;
        for (lower, b) in Self::LOWER_BOUNDS {
            if amount >= lower {
                bucket = b;
            } else {
                break;
            }
        }
        bucket
    }

    pub fn label(&self) -> &'static str {
        match self {
            PriceBucket::Under500 => "<500",
            PriceBucket::From500To1K => "500-1K",
            PriceBucket::From1KTo5K => "1K-5K",
            PriceBucket::From5KTo10K => "5K-10K",
            PriceBucket::From10KTo25K => "10K-25K",
            PriceBucket::From25KTo50K => "25K-50K",
            PriceBucket::From50KTo100K => "50K-100K",
            PriceBucket::From100KTo250K => "100K-250K",
            PriceBucket::From250KTo500K => "250K-500K",
            PriceBucket::From500KTo1M => "500K-1M",
            PriceBucket::Over1M => ">1M",
        }
    }
}

impl fmt::Display for PriceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Price fields of a line item. Before anonymization the exact amounts are
/// present; afterwards only the `*_range` buckets remain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price_range: Option<PriceBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price_range: Option<PriceBucket>,
}

impl PriceValue {
    pub fn is_empty(&self) -> bool {
        self.unit_price.is_none()
            && self.total_price.is_none()
            && self.unit_price_range.is_none()
            && self.total_price_range.is_none()
    }

    /// Bucket label for rendering, preferring the total.
    pub fn describe(&self) -> String {
        let unit = self
            .unit_price_range
            .or(self.unit_price.map(PriceBucket::for_amount));
        let total = self
            .total_price_range
            .or(self.total_price.map(PriceBucket::for_amount));
        match (unit, total) {
            (Some(u), Some(t)) => format!("unit {} / total {}", u, t),
            (Some(u), None) => format!("unit {}", u),
            (None, Some(t)) => format!("total {}", t),
            (None, None) => "none".to_string(),
        }
    }
}

/// A typed correction: one variant per [`CorrectionKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "correction_kind", rename_all = "snake_case")]
pub enum CorrectionPayload {
    Description(Change<String>),
    Category(Change<String>),
    Price(Change<PriceValue>),
    ExclusionFlag(Change<bool>),
    Quantity(Change<String>),
    Unit(Change<String>),
}

impl CorrectionPayload {
    pub fn kind(&self) -> CorrectionKind {
        match self {
            CorrectionPayload::Description(_) => CorrectionKind::Description,
            CorrectionPayload::Category(_) => CorrectionKind::Category,
            CorrectionPayload::Price(_) => CorrectionKind::Price,
            CorrectionPayload::ExclusionFlag(_) => CorrectionKind::ExclusionFlag,
            CorrectionPayload::Quantity(_) => CorrectionKind::Quantity,
            CorrectionPayload::Unit(_) => CorrectionKind::Unit,
        }
    }

    /// Split into `(kind, original_json, corrected_json)` for storage.
    pub fn to_columns(&self) -> Result<(CorrectionKind, String, String)> {
        fn pair<T: Serialize>(c: &Change<T>) -> Result<(String, String)> {
            Ok((
                serde_json::to_string(&c.original)?,
                serde_json::to_string(&c.corrected)?,
            ))
        }
        let (original, corrected) = match self {
            CorrectionPayload::Description(c)
            | CorrectionPayload::Category(c)
            | CorrectionPayload::Quantity(c)
            | CorrectionPayload::Unit(c) => pair(c)?,
            CorrectionPayload::Price(c) => pair(c)?,
            CorrectionPayload::ExclusionFlag(c) => pair(c)?,
        };
        Ok((self.kind(), original, corrected))
    }

    /// Rebuild a payload from its stored columns.
    ///
    /// Fails with [`FeedbackError::Validation`] when the stored values do not
    /// have the shape the kind requires.
    pub fn from_columns(kind: CorrectionKind, original: &str, corrected: &str) -> Result<Self> {
        fn pair<T: serde::de::DeserializeOwned>(
            kind: CorrectionKind,
            original: &str,
            corrected: &str,
        ) -> Result<Change<T>> {
            let parse = |raw: &str| {
                serde_json::from_str::<T>(raw).map_err(|e| {
                    FeedbackError::Validation(format!("malformed {} value: {}", kind, e))
                })
            };
            Ok(Change::new(parse(original)?, parse(corrected)?))
        }
        Ok(match kind {
            CorrectionKind::Description => {
                CorrectionPayload::Description(pair(kind, original, corrected)?)
            }
            CorrectionKind::Category => {
                CorrectionPayload::Category(pair(kind, original, corrected)?)
            }
            CorrectionKind::Price => CorrectionPayload::Price(pair(kind, original, corrected)?),
            CorrectionKind::ExclusionFlag => {
                CorrectionPayload::ExclusionFlag(pair(kind, original, corrected)?)
            }
            CorrectionKind::Quantity => {
                CorrectionPayload::Quantity(pair(kind, original, corrected)?)
            }
            CorrectionKind::Unit => CorrectionPayload::Unit(pair(kind, original, corrected)?),
        })
    }

    /// Check the payload is well-formed for its kind.
    pub fn validate(&self) -> Result<()> {
        match self {
            CorrectionPayload::Description(c)
            | CorrectionPayload::Category(c)
            | CorrectionPayload::Quantity(c)
            | CorrectionPayload::Unit(c) => {
                if c.original.trim().is_empty() && c.corrected.trim().is_empty() {
                    return Err(FeedbackError::Validation(format!(
                        "{} correction has neither an original nor a corrected value",
                        self.kind()
                    )));
                }
            }
            CorrectionPayload::Price(c) => {
                if c.original.is_empty() && c.corrected.is_empty() {
                    return Err(FeedbackError::Validation(
                        "price correction carries no price fields".to_string(),
                    ));
                }
                for value in [&c.original, &c.corrected] {
                    for amount in [value.unit_price, value.total_price].into_iter().flatten() {
                        if !amount.is_finite() || amount < 0.0 {
                            return Err(FeedbackError::Validation(format!(
                                "price must be a non-negative number, got {}",
                                amount
                            )));
                        }
                    }
                }
            }
            CorrectionPayload::ExclusionFlag(_) => {}
        }
        Ok(())
    }
}

/// A correction as handed over by the upstream diff routine, before
/// anonymization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCorrection {
    pub trade_category: String,
    pub document_category: String,
    pub correction: CorrectionPayload,
    #[serde(default)]
    pub text_snippet: Option<String>,
    #[serde(default)]
    pub original_confidence: Option<f64>,
}

impl NewCorrection {
    pub fn validate(&self) -> Result<()> {
        if self.trade_category.trim().is_empty() {
            return Err(FeedbackError::Validation(
                "trade_category must not be empty".to_string(),
            ));
        }
        if let Some(conf) = self.original_confidence {
            if !(0.0..=1.0).contains(&conf) {
                return Err(FeedbackError::Validation(format!(
                    "original_confidence must be within [0, 1], got {}",
                    conf
                )));
            }
        }
        self.correction.validate()
    }
}

/// Moderation state of a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    Pending,
    Approved,
    Rejected,
}

impl ModerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationState::Pending => "pending",
            ModerationState::Approved => "approved",
            ModerationState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ModerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationState {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ModerationState::Pending),
            "approved" => Ok(ModerationState::Approved),
            "rejected" => Ok(ModerationState::Rejected),
            other => Err(FeedbackError::Validation(format!(
                "unknown moderation state: '{}'",
                other
            ))),
        }
    }
}

/// An anonymized correction record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub id: String,
    pub trade_category: String,
    pub document_category: String,
    pub correction: CorrectionPayload,
    pub redacted_text_snippet: Option<String>,
    pub original_confidence: Option<f64>,
    pub moderation_state: ModerationState,
    pub contributed_at: i64,
    pub moderated_at: Option<i64>,
}

impl Contribution {
    pub fn kind(&self) -> CorrectionKind {
        self.correction.kind()
    }
}

/// Kind of rule a pattern refinement encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementKind {
    Terminology,
    CategoryRule,
    ExtractionRule,
}

impl RefinementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefinementKind::Terminology => "terminology",
            RefinementKind::CategoryRule => "category_rule",
            RefinementKind::ExtractionRule => "extraction_rule",
        }
    }
}

impl fmt::Display for RefinementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefinementKind {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "terminology" => Ok(RefinementKind::Terminology),
            "category_rule" => Ok(RefinementKind::CategoryRule),
            "extraction_rule" => Ok(RefinementKind::ExtractionRule),
            other => Err(FeedbackError::Validation(format!(
                "unknown refinement kind: '{}'",
                other
            ))),
        }
    }
}

/// The `from → to` transformation a refinement describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternValue {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A discovered correction rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternRefinement {
    pub trade_category: String,
    pub refinement_kind: RefinementKind,
    pub pattern_key: String,
    pub pattern_value: PatternValue,
    pub occurrence_count: i64,
    pub is_active: bool,
    pub auto_promoted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Persisted per-category calibration state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceThreshold {
    pub trade_category: String,
    pub low_threshold: f64,
    pub medium_threshold: f64,
    pub total_corrections: i64,
    pub high_confidence_corrections: i64,
    pub medium_confidence_corrections: i64,
    pub low_confidence_corrections: i64,
    pub last_calibrated_at: i64,
}

/// Confidence band a raw extraction score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfidenceBand::Low => "low",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::High => "high",
        })
    }
}

/// Semantic index entry for one approved contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionEmbedding {
    pub contribution_id: String,
    pub trade_category: String,
    pub correction_kind: CorrectionKind,
    pub embedded_text: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub quality_score: f64,
    pub is_high_quality: bool,
    pub created_at: i64,
}

/// A [`CorrectionEmbedding`] paired with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredEmbedding {
    pub embedding: CorrectionEmbedding,
    pub similarity: f64,
}

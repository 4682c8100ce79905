//! Text rendering shared by the indexer and the retriever.
//!
//! Stored corrections and retrieval queries are embedded from the same
//! line-oriented layout so their vectors are comparable:
//!
//! ```text
//! Trade: electrical
//! Correction: description
//! Original: Cu wire
//! Corrected: Copper wire 12 AWG
//! Context: ...
//! ```

use crate::anonymize::truncate_chars;
use crate::models::{Change, Contribution, CorrectionKind, CorrectionPayload, PriceValue};

/// Snippet characters carried into embedded text.
pub const CONTEXT_CHARS: usize = 200;

/// Quality score at or above which an embedding is high quality.
pub const HIGH_QUALITY_SCORE: f64 = 0.8;

/// Minimum snippet length that earns the context bonus.
const MIN_USEFUL_SNIPPET: usize = 20;

/// Render the text embedded for a stored contribution.
pub fn embedded_text(contribution: &Contribution) -> String {
    let change = render_change(&contribution.correction);
    render_fields(
        &contribution.trade_category,
        Some(contribution.kind()),
        Some(&change),
        contribution.redacted_text_snippet.as_deref(),
    )
}

/// Render a retrieval query through the same layout as [`embedded_text`].
///
/// A query has no original/corrected pair, so those lines are omitted; the
/// `Correction:` line is present when the caller knows the kind.
pub fn query_text(trade_category: &str, kind: Option<CorrectionKind>, query: &str) -> String {
    render_fields(trade_category, kind, None, Some(query))
}

fn render_fields(
    trade_category: &str,
    kind: Option<CorrectionKind>,
    change: Option<&(String, String)>,
    context: Option<&str>,
) -> String {
    let mut out = format!("Trade: {}", trade_category);
    if let Some(kind) = kind {
        out.push_str(&format!("\nCorrection: {}", kind));
    }
    if let Some((original, corrected)) = change {
        out.push_str(&format!("\nOriginal: {}\nCorrected: {}", original, corrected));
    }
    if let Some(context) = non_empty(context) {
        out.push_str(&format!(
            "\nContext: {}",
            truncate_chars(context, CONTEXT_CHARS)
        ));
    }
    out
}

/// Score how useful a contribution is as a few-shot example, in `[0, 1]`.
///
/// Starts at 0.5; a snippet of at least 20 characters adds 0.2, a real
/// change between two non-empty values adds 0.2, and a recorded model
/// confidence adds 0.1.
pub fn quality_score(contribution: &Contribution) -> f64 {
    let mut score = 0.5;

    let snippet_len = contribution
        .redacted_text_snippet
        .as_deref()
        .map(|s| s.trim().chars().count())
        .unwrap_or(0);
    if snippet_len >= MIN_USEFUL_SNIPPET {
        score += 0.2;
    }

    if is_meaningful_change(&contribution.correction) {
        score += 0.2;
    }

    if contribution.original_confidence.is_some() {
        score += 0.1;
    }

    (score * 100.0_f64).round() / 100.0
}

pub fn is_high_quality(score: f64) -> bool {
    score >= HIGH_QUALITY_SCORE - 1e-9
}

fn is_meaningful_change(payload: &CorrectionPayload) -> bool {
    fn text(c: &Change<String>) -> bool {
        let (o, n) = (c.original.trim(), c.corrected.trim());
        !o.is_empty() && !n.is_empty() && o != n
    }
    match payload {
        CorrectionPayload::Description(c)
        | CorrectionPayload::Category(c)
        | CorrectionPayload::Quantity(c)
        | CorrectionPayload::Unit(c) => text(c),
        CorrectionPayload::Price(c) => {
            !c.original.is_empty() && !c.corrected.is_empty() && c.original != c.corrected
        }
        CorrectionPayload::ExclusionFlag(c) => c.original != c.corrected,
    }
}

/// Human-readable `(original, corrected)` rendering of a payload.
pub fn render_change(payload: &CorrectionPayload) -> (String, String) {
    fn text(value: &str) -> String {
        match value.trim() {
            "" => "(empty)".to_string(),
            v => v.to_string(),
        }
    }
    fn price(value: &PriceValue) -> String {
        value.describe()
    }
    fn flag(excluded: bool) -> String {
        if excluded { "excluded" } else { "included" }.to_string()
    }

    match payload {
        CorrectionPayload::Description(c)
        | CorrectionPayload::Category(c)
        | CorrectionPayload::Quantity(c)
        | CorrectionPayload::Unit(c) => (text(&c.original), text(&c.corrected)),
        CorrectionPayload::Price(c) => (price(&c.original), price(&c.corrected)),
        CorrectionPayload::ExclusionFlag(c) => (flag(c.original), flag(c.corrected)),
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

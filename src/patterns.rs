//! Pattern mining over approved contributions.
//!
//! Every run recomputes occurrence counts from the full approved set and
//! merges them into `pattern_refinements` with `max`, so counts never go
//! down and repeated runs over the same data write nothing. A pattern
//! becomes active the first time its count reaches the promotion
//! threshold and stays active from then on.
//!
//! | Correction | Refinement | Key |
//! |------------|------------|-----|
//! | description | `terminology` | original text |
//! | category | `category_rule` | original category |
//! | exclusion_flag | `extraction_rule` | `false_to_true` / `true_to_false` |
//!
//! Price, quantity and unit corrections carry no reusable rule.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result as AnyResult;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::models::{Contribution, CorrectionPayload, PatternRefinement, PatternValue, RefinementKind};
use crate::store::Store;

/// Maximum length of a pattern key, in characters.
pub const MAX_KEY_CHARS: usize = 50;

/// Outcome of one analyzer run.
///
/// `promoted` may overlap `new`: a key seen for the first time with enough
/// occurrences is both.
#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub contributions_scanned: usize,
    pub new: Vec<PatternRefinement>,
    /// Keys whose occurrence count grew.
    pub updated: Vec<PatternRefinement>,
    /// Keys rewritten only because their most common replacement changed.
    pub revised: Vec<PatternRefinement>,
    pub promoted: Vec<PatternRefinement>,
    pub unchanged: usize,
    pub failed: usize,
}

/// Mines recurring corrections into [`PatternRefinement`]s.
pub struct PatternAnalyzer {
    store: Arc<dyn Store>,
    promotion_threshold: i64,
}

type GroupKey = (String, RefinementKind, String);

/// Accumulated occurrences of one candidate key.
struct Aggregate {
    count: i64,
    from: String,
    context: Option<String>,
    /// Replacement values with their counts, in first-seen order.
    targets: Vec<(String, i64)>,
}

impl Aggregate {
    fn value(&self) -> PatternValue {
        let mut best: Option<&(String, i64)> = None;
        for target in &self.targets {
            if best.map_or(true, |b| target.1 > b.1) {
                best = Some(target);
            }
        }
        PatternValue {
            from: self.from.clone(),
            to: best.map(|b| b.0.clone()).unwrap_or_default(),
            context: self.context.clone(),
        }
    }
}

struct Candidate {
    kind: RefinementKind,
    key: String,
    from: String,
    to: String,
    context: Option<String>,
}

impl PatternAnalyzer {
    pub fn new(store: Arc<dyn Store>, promotion_threshold: i64) -> Self {
        Self {
            store,
            promotion_threshold,
        }
    }

    /// Recount patterns for one trade category (or all of them) and persist
    /// the changes.
    ///
    /// A failed write for one key is logged and counted in
    /// [`AnalysisReport::failed`]; the remaining keys are still written.
    pub async fn analyze(&self, trade_category: Option<&str>) -> Result<AnalysisReport> {
        let contributions = self.store.approved_contributions(trade_category).await?;
        let existing: HashMap<GroupKey, PatternRefinement> = self
            .store
            .list_patterns(trade_category, false)
            .await?
            .into_iter()
            .map(|p| {
                (
                    (p.trade_category.clone(), p.refinement_kind, p.pattern_key.clone()),
                    p,
                )
            })
            .collect();

        let aggregates = aggregate(&contributions);
        let now = chrono::Utc::now().timestamp();
        let mut report = AnalysisReport {
            contributions_scanned: contributions.len(),
            ..Default::default()
        };

        for ((trade, kind, key), agg) in aggregates {
            let prior = existing.get(&(trade.clone(), kind, key.clone()));
            let prior_count = prior.map_or(0, |p| p.occurrence_count);
            let prior_active = prior.is_some_and(|p| p.is_active);

            let count = prior_count.max(agg.count);
            let is_active = prior_active || count >= self.promotion_threshold;
            let promoted = is_active && !prior_active;
            let value = agg.value();

            if let Some(p) = prior {
                if count == p.occurrence_count && !promoted && value == p.pattern_value {
                    report.unchanged += 1;
                    continue;
                }
            }

            let refinement = PatternRefinement {
                trade_category: trade,
                refinement_kind: kind,
                pattern_key: key,
                pattern_value: value,
                occurrence_count: count,
                is_active,
                auto_promoted_at: match prior.and_then(|p| p.auto_promoted_at) {
                    Some(at) => Some(at),
                    None if promoted => Some(now),
                    None => None,
                },
                created_at: prior.map_or(now, |p| p.created_at),
                updated_at: now,
            };

            if let Err(e) = self.store.upsert_pattern(&refinement).await {
                tracing::warn!(
                    trade = %refinement.trade_category,
                    kind = %refinement.refinement_kind,
                    key = %refinement.pattern_key,
                    "failed to persist pattern: {}",
                    e
                );
                report.failed += 1;
                continue;
            }

            if promoted {
                tracing::info!(
                    trade = %refinement.trade_category,
                    key = %refinement.pattern_key,
                    count,
                    "pattern promoted"
                );
                report.promoted.push(refinement.clone());
            }
            if prior.is_none() {
                report.new.push(refinement);
            } else if count > prior_count {
                report.updated.push(refinement);
            } else if prior.is_some_and(|p| p.pattern_value != refinement.pattern_value) {
                report.revised.push(refinement);
            }
        }

        tracing::info!(
            scanned = report.contributions_scanned,
            new = report.new.len(),
            updated = report.updated.len(),
            revised = report.revised.len(),
            promoted = report.promoted.len(),
            failed = report.failed,
            "pattern analysis finished"
        );
        Ok(report)
    }
}

fn aggregate(contributions: &[Contribution]) -> BTreeMap<GroupKey, Aggregate> {
    let mut groups: BTreeMap<GroupKey, Aggregate> = BTreeMap::new();

    for contribution in contributions {
        let Some(candidate) = candidate(contribution) else {
            continue;
        };
        let group = groups
            .entry((
                contribution.trade_category.clone(),
                candidate.kind,
                candidate.key,
            ))
            .or_insert_with(|| Aggregate {
                count: 0,
                from: candidate.from,
                context: candidate.context,
                targets: Vec::new(),
            });
        group.count += 1;
        match group.targets.iter_mut().find(|(t, _)| *t == candidate.to) {
            Some(target) => target.1 += 1,
            None => group.targets.push((candidate.to, 1)),
        }
    }
    groups
}

fn candidate(contribution: &Contribution) -> Option<Candidate> {
    let (kind, from, to, key_source, context) = match &contribution.correction {
        CorrectionPayload::Description(c) => {
            let (from, to) = (c.original.trim(), c.corrected.trim());
            if from == to {
                return None;
            }
            (RefinementKind::Terminology, from.to_string(), to.to_string(), from.to_string(), None)
        }
        CorrectionPayload::Category(c) => {
            let (from, to) = (c.original.trim(), c.corrected.trim());
            if from == to {
                return None;
            }
            (
                RefinementKind::CategoryRule,
                from.to_string(),
                to.to_string(),
                from.to_string(),
                Some(contribution.document_category.clone()),
            )
        }
        CorrectionPayload::ExclusionFlag(c) => {
            if c.original == c.corrected {
                return None;
            }
            (
                RefinementKind::ExtractionRule,
                exclusion_label(c.original).to_string(),
                exclusion_label(c.corrected).to_string(),
                format!("{} to {}", c.original, c.corrected),
                Some(contribution.document_category.clone()),
            )
        }
        CorrectionPayload::Price(_) | CorrectionPayload::Quantity(_) | CorrectionPayload::Unit(_) => {
            return None
        }
    };

    let key = normalize_pattern_key(&key_source);
    if key.is_empty() {
        return None;
    }
    Some(Candidate {
        kind,
        key,
        from,
        to,
        context: context.filter(|c| !c.trim().is_empty()),
    })
}

fn exclusion_label(excluded: bool) -> &'static str {
    if excluded {
        "excluded"
    } else {
        "included"
    }
}

/// Normalize text into a pattern key: lowercase, drop everything except
/// word characters, hyphens and whitespace, join whitespace runs with `_`,
/// and cap the result at [`MAX_KEY_CHARS`].
pub fn normalize_pattern_key(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(MAX_KEY_CHARS)
        .collect()
}

/// Active refinements for a trade category, most frequent first.
pub async fn active_patterns(store: &dyn Store, trade_category: &str) -> Result<Vec<PatternRefinement>> {
    store.list_patterns(Some(trade_category), true).await
}

/// Render refinements as a rules block for an extraction prompt.
///
/// Returns an empty string when there is nothing to render.
pub fn format_pattern_rules(patterns: &[PatternRefinement]) -> String {
    if patterns.is_empty() {
        return String::new();
    }

    let mut out = String::from("Learned correction rules:\n");
    for p in patterns {
        let v = &p.pattern_value;
        let rule = match p.refinement_kind {
            RefinementKind::Terminology => {
                format!("Write \"{}\" as \"{}\"", v.from, v.to)
            }
            RefinementKind::CategoryRule => {
                format!("Items categorized as \"{}\" belong in \"{}\"", v.from, v.to)
            }
            RefinementKind::ExtractionRule => {
                format!("Items extracted as {} are usually {} after review", v.from, v.to)
            }
        };
        out.push_str(&format!("- {}", rule));
        if let Some(ctx) = &v.context {
            out.push_str(&format!(" ({} documents)", ctx));
        }
        out.push_str(&format!(" [seen {} times]\n", p.occurrence_count));
    }
    out
}

pub async fn run_analyze(config: &Config, trade: Option<&str>) -> AnyResult<()> {
    let store = Arc::new(db::open_store(config).await?);
    let analyzer = PatternAnalyzer::new(store.clone(), config.patterns.promotion_threshold);
    let report = analyzer.analyze(trade).await?;

    print_report(&report);

    store.pool().close().await;
    Ok(())
}

pub(crate) fn print_report(report: &AnalysisReport) {
    println!("analyze");
    println!("  contributions scanned: {}", report.contributions_scanned);
    println!("  new: {}", report.new.len());
    println!("  updated: {}", report.updated.len());
    println!("  revised: {}", report.revised.len());
    println!("  promoted: {}", report.promoted.len());
    println!("  unchanged: {}", report.unchanged);
    println!("  failed: {}", report.failed);
    for p in &report.promoted {
        println!(
            "    + {} {} {} ({})",
            p.trade_category, p.refinement_kind, p.pattern_key, p.occurrence_count
        );
    }
}

pub async fn run_patterns(config: &Config, trade: Option<&str>, active_only: bool) -> AnyResult<()> {
    let store = db::open_store(config).await?;
    let patterns = store.list_patterns(trade, active_only).await?;

    if patterns.is_empty() {
        println!("No patterns.");
    } else {
        println!(
            "{:<16} {:<16} {:<32} {:>6}  {}",
            "TRADE", "KIND", "KEY", "COUNT", "ACTIVE"
        );
        for p in &patterns {
            println!(
                "{:<16} {:<16} {:<32} {:>6}  {}",
                p.trade_category,
                p.refinement_kind,
                p.pattern_key,
                p.occurrence_count,
                if p.is_active { "yes" } else { "no" }
            );
        }
    }

    store.pool().close().await;
    Ok(())
}

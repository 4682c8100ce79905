//! Redaction of sensitive content in reviewer corrections.
//!
//! Every correction passes through [`Anonymizer::anonymize`] before it is
//! stored. Text fields are scanned by an ordered list of regex detectors:
//!
//! | Priority | Detector | Replacement |
//! |----------|----------|-------------|
//! | 1 | `organization` | `[COMPANY]` |
//! | 2 | `currency` | `[AMOUNT:<bucket>]` |
//! | 3 | `phone` | `[PHONE]` |
//! | 4 | `email` | `[EMAIL]` |
//! | 5 | `address` | `[ADDRESS]` |
//! | 6 | `project_id` | `[PROJECT_ID]` |
//! | 7 | `date` | `[DATE]` |
//! | 8 | `person_name` | `[NAME]` |
//!
//! Price fields are not masked but replaced: `total_price` becomes
//! `total_price_range` and the exact amount is dropped.
//!
//! Placeholders are all-caps inside brackets and none of the detectors can
//! match them, so anonymizing already-anonymized output is a no-op.

use regex::{Captures, NoExpand, Regex};
use serde::{Deserialize, Serialize};

use crate::config::AnonymizerConfig;
use crate::error::{FeedbackError, Result};
use crate::models::{Change, CorrectionPayload, NewCorrection, PriceBucket, PriceValue};

/// Built-in detector identities, listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Organization,
    Currency,
    Phone,
    Email,
    Address,
    ProjectId,
    Date,
    PersonName,
}

const ORGANIZATION_PATTERN: &str = r"\b(?:(?:[A-Z][a-z][\w'-]*|&)\s+){0,3}[A-Z][a-z][\w'-]*,?\s+(?:Inc|LLC|Ltd|Corp|Corporation|Co|Company|Group|Contracting|Contractors|Builders|Enterprises|Industries|Partners)\b\.?";

const CURRENCY_PATTERN: &str =
    r"(?:\$|\bUSD\s?)\s?(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d+))?(?:\s?([kKmM])\b)?";

const PHONE_PATTERN: &str = r"(?:\+?1[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]\d{4}\b";

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";

const ADDRESS_PATTERN: &str = r"\b\d{1,6}\s+(?:[A-Z][a-z]+\.?\s+){1,4}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Drive|Dr|Lane|Ln|Way|Court|Ct|Place|Pl|Parkway|Pkwy|Highway|Hwy|Circle|Cir)\b\.?";

const PROJECT_ID_PATTERN: &str = r"(?i:\b(?:project|bid|job|rfp|rfq|po|contract)\s*(?:#|no\.|no|number|id)\s*:?\s*[a-z0-9][a-z0-9-]*\d[a-z0-9-]*)|\b[A-Z]{2,5}-\d{2,}(?:-[A-Z0-9]+)*\b";

const DATE_PATTERN: &str = concat!(
    r"\b(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\.?\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s+\d{4})?\b",
    r"|\b\d{1,2}(?:st|nd|rd|th)?\s+(?:January|February|March|April|May|June|July|August|September|October|November|December),?\s+\d{4}\b",
    r"|\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{4}\b",
    r"|\b\d{4}-\d{2}-\d{2}\b",
    r"|\b\d{1,2}[/.-]\d{1,2}[/.-](?:\d{4}|\d{2})\b",
);

const PERSON_NAME_PATTERN: &str = r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,2}\b";

impl DetectorKind {
    pub const PRIORITY: [DetectorKind; 8] = [
        DetectorKind::Organization,
        DetectorKind::Currency,
        DetectorKind::Phone,
        DetectorKind::Email,
        DetectorKind::Address,
        DetectorKind::ProjectId,
        DetectorKind::Date,
        DetectorKind::PersonName,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::Organization => "organization",
            DetectorKind::Currency => "currency",
            DetectorKind::Phone => "phone",
            DetectorKind::Email => "email",
            DetectorKind::Address => "address",
            DetectorKind::ProjectId => "project_id",
            DetectorKind::Date => "date",
            DetectorKind::PersonName => "person_name",
        }
    }

    fn default_pattern(&self) -> &'static str {
        match self {
            DetectorKind::Organization => ORGANIZATION_PATTERN,
            DetectorKind::Currency => CURRENCY_PATTERN,
            DetectorKind::Phone => PHONE_PATTERN,
            DetectorKind::Email => EMAIL_PATTERN,
            DetectorKind::Address => ADDRESS_PATTERN,
            DetectorKind::ProjectId => PROJECT_ID_PATTERN,
            DetectorKind::Date => DATE_PATTERN,
            DetectorKind::PersonName => PERSON_NAME_PATTERN,
        }
    }

    fn replacement(&self) -> Replacement {
        let placeholder = match self {
            DetectorKind::Currency => return Replacement::CurrencyBucket,
            DetectorKind::Organization => "[COMPANY]",
            DetectorKind::Phone => "[PHONE]",
            DetectorKind::Email => "[EMAIL]",
            DetectorKind::Address => "[ADDRESS]",
            DetectorKind::ProjectId => "[PROJECT_ID]",
            DetectorKind::Date => "[DATE]",
            DetectorKind::PersonName => "[NAME]",
        };
        Replacement::Placeholder(placeholder.to_string())
    }
}

#[derive(Debug, Clone)]
enum Replacement {
    Placeholder(String),
    /// Replace with `[AMOUNT:<bucket>]`. Expects the currency capture layout:
    /// 1 = integer part, 2 = fraction, 3 = k/m suffix.
    CurrencyBucket,
}

#[derive(Debug, Clone)]
struct Detector {
    name: String,
    regex: Regex,
    replacement: Replacement,
}

impl Detector {
    fn apply(&self, text: &str) -> String {
        match &self.replacement {
            Replacement::Placeholder(p) => self.regex.replace_all(text, NoExpand(p)).into_owned(),
            Replacement::CurrencyBucket => self
                .regex
                .replace_all(text, |caps: &Captures| match parse_amount(caps) {
                    Some(amount) => format!("[AMOUNT:{}]", PriceBucket::for_amount(amount)),
                    None => "[AMOUNT]".to_string(),
                })
                .into_owned(),
        }
    }
}

fn parse_amount(caps: &Captures) -> Option<f64> {
    let integer = caps.get(1)?.as_str().replace(',', "");
    let raw = match caps.get(2) {
        Some(fraction) => format!("{}.{}", integer, fraction.as_str()),
        None => integer,
    };
    let value: f64 = raw.parse().ok()?;
    let multiplier = match caps.get(3).map(|m| m.as_str()) {
        Some("k") | Some("K") => 1_000.0,
        Some("m") | Some("M") => 1_000_000.0,
        _ => 1.0,
    };
    Some(value * multiplier)
}

const MAX_SNIPPET_PASSES: usize = 8;

/// Deterministic, side-effect-free redactor for corrections.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    detectors: Vec<Detector>,
    max_snippet_chars: usize,
}

impl Anonymizer {
    /// Build the detector chain from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::Config`] if an overridden or custom pattern
    /// fails to compile.
    pub fn from_config(config: &AnonymizerConfig) -> Result<Self> {
        let mut detectors = Vec::new();

        for kind in DetectorKind::PRIORITY {
            let over = config.detectors.iter().rev().find(|d| d.name == kind);
            if over.is_some_and(|o| !o.enabled) {
                continue;
            }
            let pattern = over
                .and_then(|o| o.pattern.as_deref())
                .unwrap_or(kind.default_pattern());
            detectors.push(Detector {
                name: kind.name().to_string(),
                regex: compile(kind.name(), pattern)?,
                replacement: kind.replacement(),
            });
        }

        for custom in &config.custom {
            detectors.push(Detector {
                name: custom.name.clone(),
                regex: compile(&custom.name, &custom.pattern)?,
                replacement: Replacement::Placeholder(custom.placeholder.clone()),
            });
        }

        Ok(Self {
            detectors,
            max_snippet_chars: config.max_snippet_chars,
        })
    }

    /// Names of the active detectors, in the order they run.
    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name.as_str()).collect()
    }

    /// Run every detector over `text` in priority order.
    pub fn redact_text(&self, text: &str) -> String {
        self.detectors
            .iter()
            .fold(text.to_string(), |acc, detector| detector.apply(&acc))
    }

    /// Produce the anonymized form of a correction.
    ///
    /// Applying this to its own output returns the same value.
    pub fn anonymize(&self, correction: &NewCorrection) -> NewCorrection {
        let payload = match &correction.correction {
            CorrectionPayload::Description(c) => CorrectionPayload::Description(self.redact_change(c)),
            CorrectionPayload::Category(c) => CorrectionPayload::Category(self.redact_change(c)),
            CorrectionPayload::Quantity(c) => CorrectionPayload::Quantity(self.redact_change(c)),
            CorrectionPayload::Unit(c) => CorrectionPayload::Unit(self.redact_change(c)),
            CorrectionPayload::Price(c) => CorrectionPayload::Price(Change::new(
                bucket_price(&c.original),
                bucket_price(&c.corrected),
            )),
            CorrectionPayload::ExclusionFlag(c) => CorrectionPayload::ExclusionFlag(c.clone()),
        };

        let text_snippet = correction
            .text_snippet
            .as_deref()
            .map(|s| self.redact_snippet(s));

        NewCorrection {
            trade_category: correction.trade_category.clone(),
            document_category: correction.document_category.clone(),
            correction: payload,
            text_snippet,
            original_confidence: correction.original_confidence,
        }
    }

    /// Redact and cut a snippet to `max_snippet_chars`.
    ///
    /// A cut can leave a fragment that a detector now matches, so redaction
    /// and truncation repeat until the text stops changing.
    fn redact_snippet(&self, text: &str) -> String {
        let mut current = truncate_chars(&self.redact_text(text), self.max_snippet_chars);
        for _ in 0..MAX_SNIPPET_PASSES {
            let next = truncate_chars(&self.redact_text(&current), self.max_snippet_chars);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn redact_change(&self, change: &Change<String>) -> Change<String> {
        Change::new(
            self.redact_text(&change.original),
            self.redact_text(&change.corrected),
        )
    }
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::from_config(&AnonymizerConfig::default())
            .expect("built-in detector patterns compile")
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| FeedbackError::Config(format!("detector '{}' has an invalid pattern: {}", name, e)))
}

/// Replace exact price fields with their magnitude buckets.
pub fn bucket_price(value: &PriceValue) -> PriceValue {
    PriceValue {
        unit_price: None,
        total_price: None,
        unit_price_range: value
            .unit_price
            .map(PriceBucket::for_amount)
            .or(value.unit_price_range),
        total_price_range: value
            .total_price
            .map(PriceBucket::for_amount)
            .or(value.total_price_range),
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

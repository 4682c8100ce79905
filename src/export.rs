//! Export approved contributions as training data.
//!
//! Two formats:
//! - `jsonl`: one chat-style fine-tuning record per line, with a system,
//!   user and assistant message. The user message is the extraction as
//!   the model produced it; the assistant message is the reviewed value.
//! - `raw`: a pretty-printed JSON array of the approved contributions.
//!
//! Only anonymized, approved rows are ever exported.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::models::Contribution;
use crate::store::Store;
use crate::text;

const SYSTEM_PROMPT: &str = "You extract line items from construction bid documents. \
Return the corrected value for the requested field.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Jsonl,
    Raw,
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonl" => Ok(ExportFormat::Jsonl),
            "raw" => Ok(ExportFormat::Raw),
            other => bail!("Unknown export format: {} (expected jsonl or raw)", other),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct FineTuneRecord {
    pub messages: Vec<ChatMessage>,
}

/// Build the fine-tuning triple for one contribution.
pub fn fine_tune_record(contribution: &Contribution) -> FineTuneRecord {
    let (original, corrected) = text::render_change(&contribution.correction);

    let mut user = format!(
        "Trade: {}\nDocument: {}\nField: {}\nExtracted: {}",
        contribution.trade_category,
        contribution.document_category,
        contribution.kind(),
        original
    );
    if let Some(snippet) = contribution
        .redacted_text_snippet
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        user.push_str(&format!("\nSource text: {}", snippet.trim()));
    }

    FineTuneRecord {
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user",
                content: user,
            },
            ChatMessage {
                role: "assistant",
                content: corrected,
            },
        ],
    }
}

/// Write contributions in the requested format.
pub fn write_export<W: Write>(
    contributions: &[Contribution],
    format: ExportFormat,
    out: &mut W,
) -> Result<()> {
    match format {
        ExportFormat::Jsonl => {
            for c in contributions {
                serde_json::to_writer(&mut *out, &fine_tune_record(c))?;
                out.write_all(b"\n")?;
            }
        }
        ExportFormat::Raw => {
            serde_json::to_writer_pretty(&mut *out, contributions)?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}

/// Export approved contributions.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    let store = db::open_store(config).await?;
    let contributions = store.approved_contributions(None).await?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
            write_export(&contributions, format, &mut file)?;
            file.flush()?;
            eprintln!(
                "Exported {} contributions to {}",
                contributions.len(),
                path.display()
            );
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            write_export(&contributions, format, &mut lock)?;
        }
    }

    store.pool().close().await;
    Ok(())
}

//! Database statistics and health overview.
//!
//! Summarizes the feedback loop: contributions by moderation state,
//! discovered and active patterns, calibrated categories and embedding
//! coverage of the approved set, with a per-trade breakdown. Used by
//! `tfb stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-trade breakdown of approved contributions and derived rows.
struct TradeStats {
    trade: String,
    approved: i64,
    embedded: i64,
    active_patterns: i64,
    thresholds: Option<(f64, f64)>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let state_rows = sqlx::query(
        "SELECT moderation_state, COUNT(*) AS n FROM contributions GROUP BY moderation_state",
    )
    .fetch_all(&pool)
    .await?;
    let count_for = |state: &str| -> i64 {
        state_rows
            .iter()
            .find(|r| r.get::<String, _>("moderation_state") == state)
            .map(|r| r.get::<i64, _>("n"))
            .unwrap_or(0)
    };
    let (pending, approved, rejected) = (
        count_for("pending"),
        count_for("approved"),
        count_for("rejected"),
    );

    let total_patterns: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pattern_refinements")
        .fetch_one(&pool)
        .await?;
    let active_patterns: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pattern_refinements WHERE is_active = 1")
            .fetch_one(&pool)
            .await?;
    let calibrated: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM confidence_thresholds")
        .fetch_one(&pool)
        .await?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM correction_embeddings")
        .fetch_one(&pool)
        .await?;
    let high_quality: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM correction_embeddings WHERE is_high_quality = 1")
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Training Feedback: Database Stats");
    println!("==================================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Contributions: {}", pending + approved + rejected);
    println!("    pending:     {}", pending);
    println!("    approved:    {}", approved);
    println!("    rejected:    {}", rejected);
    println!(
        "  Patterns:      {} ({} active)",
        total_patterns, active_patterns
    );
    println!("  Calibrated:    {} categories", calibrated);
    println!(
        "  Embedded:      {} / {} ({}%), {} high quality",
        embedded,
        approved,
        if approved > 0 {
            (embedded * 100) / approved
        } else {
            0
        },
        high_quality
    );

    let trade_rows = sqlx::query(
        r#"
        SELECT
            c.trade_category AS trade,
            COUNT(DISTINCT c.id) AS approved,
            COUNT(DISTINCT e.contribution_id) AS embedded
        FROM contributions c
        LEFT JOIN correction_embeddings e ON e.contribution_id = c.id
        WHERE c.moderation_state = 'approved'
        GROUP BY c.trade_category
        ORDER BY approved DESC, trade ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let pattern_rows = sqlx::query(
        "SELECT trade_category, COUNT(*) AS n FROM pattern_refinements \
         WHERE is_active = 1 GROUP BY trade_category",
    )
    .fetch_all(&pool)
    .await?;

    let threshold_rows = sqlx::query(
        "SELECT trade_category, low_threshold, medium_threshold FROM confidence_thresholds",
    )
    .fetch_all(&pool)
    .await?;

    let mut trades: Vec<TradeStats> = Vec::new();
    for row in &trade_rows {
        let trade: String = row.get("trade");
        let active_patterns = pattern_rows
            .iter()
            .find(|p| p.get::<String, _>("trade_category") == trade)
            .map(|p| p.get::<i64, _>("n"))
            .unwrap_or(0);
        let thresholds = threshold_rows
            .iter()
            .find(|t| t.get::<String, _>("trade_category") == trade)
            .map(|t| {
                (
                    t.get::<f64, _>("low_threshold"),
                    t.get::<f64, _>("medium_threshold"),
                )
            });

        trades.push(TradeStats {
            trade,
            approved: row.get("approved"),
            embedded: row.get("embedded"),
            active_patterns,
            thresholds,
        });
    }

    if !trades.is_empty() {
        println!();
        println!("  By trade:");
        println!(
            "  {:<20} {:>8} {:>8} {:>8}   {}",
            "TRADE", "APPROVED", "EMBEDDED", "RULES", "THRESHOLDS"
        );
        println!("  {}", "-".repeat(70));

        for t in &trades {
            let thresholds = match t.thresholds {
                Some((low, medium)) => format!("{:.2} / {:.2}", low, medium),
                None => "defaults".to_string(),
            };
            println!(
                "  {:<20} {:>8} {:>8} {:>8}   {}",
                t.trade, t.approved, t.embedded, t.active_patterns, thresholds
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

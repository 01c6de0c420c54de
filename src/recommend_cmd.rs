//! `pio recommend add` and `pio recommend batch`.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::backend::BackendClient;
use crate::config::Config;
use crate::models::RecommendationRecord;

/// Who a batch is delivered to.
#[derive(Debug, Clone)]
pub enum Targets {
    Users(Vec<String>),
    AllUsers,
}

/// Add a single recommendation for one user.
pub async fn run_add(config: &Config, username: &str, record: RecommendationRecord) -> Result<()> {
    let client = BackendClient::new(&config.backend)?;
    client.add_recommendation(username, &record).await?;
    println!("recommend add");
    println!("  user: {}", username);
    println!("  paper: {}", record.paper_id);
    println!("  ok");
    Ok(())
}

/// Load records from a file holding either a JSON array or JSON Lines.
pub fn load_records(path: &Path) -> Result<Vec<RecommendationRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;
    parse_records(&content).with_context(|| format!("Invalid records file: {}", path.display()))
}

pub fn parse_records(content: &str) -> Result<Vec<RecommendationRecord>> {
    let records: Vec<RecommendationRecord> = if content.trim_start().starts_with('[') {
        serde_json::from_str(content)?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<RecommendationRecord>(line)
                    .with_context(|| format!("line {}", i + 1))
            })
            .collect::<Result<_>>()?
    };

    for rec in &records {
        rec.validate()?;
    }
    Ok(records)
}

/// Post every record to every target user. Failures are logged and
/// counted; the command fails at the end if any item failed.
pub async fn run_batch(config: &Config, path: &Path, targets: Targets, dry_run: bool) -> Result<()> {
    let records = load_records(path)?;
    let client = BackendClient::new(&config.backend)?;

    let users = match targets {
        Targets::Users(users) => users,
        Targets::AllUsers => client
            .list_users()
            .await?
            .into_iter()
            .map(|u| u.username)
            .collect(),
    };

    if dry_run {
        println!("recommend batch (dry-run)");
        println!("  records: {}", records.len());
        println!("  users: {}", users.len());
        println!("  would attempt: {}", records.len() * users.len());
        return Ok(());
    }

    let mut attempted = 0u64;
    let mut added = 0u64;
    let mut failed = 0u64;

    for user in &users {
        for rec in &records {
            attempted += 1;
            match client.add_recommendation(user, rec).await {
                Ok(()) => {
                    tracing::debug!(user = %user, paper = %rec.paper_id, "recommendation added");
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!(user = %user, paper = %rec.paper_id, "recommendation failed: {:#}", e);
                    failed += 1;
                }
            }
        }
    }

    println!("recommend batch");
    println!("  attempted: {}", attempted);
    println!("  added: {}", added);
    println!("  failed: {}", failed);

    if failed > 0 {
        bail!("{} of {} recommendations failed", failed, attempted);
    }
    Ok(())
}

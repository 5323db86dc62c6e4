use crate::model::ArchiveRunRecord;
use crate::out;
use crate::store::{ArchiveStore, Store};
use crate::Cli;
use anyhow::{Context, Result};
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct RunsArgs {
    /// Only runs of this chat
    #[arg(long)]
    pub chat: Option<i64>,

    /// Show at most this many runs, newest first
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

fn select(runs: Vec<ArchiveRunRecord>, args: &RunsArgs) -> Vec<ArchiveRunRecord> {
    runs.into_iter()
        .filter(|r| args.chat.is_none_or(|chat| r.target_id == chat))
        .take(args.limit)
        .collect()
}

pub async fn run(cli: &Cli, args: &RunsArgs) -> Result<()> {
    let path = cli.layout().core_db();
    if !path.exists() {
        anyhow::bail!("Nothing archived yet in {}", cli.layout().root().display());
    }
    let store = Store::open(&path)
        .await
        .context("Failed to open the core store")?;
    let runs = select(store.list_archive_runs().await?, args);

    if cli.output.is_json() {
        return out::write_json(&serde_json::json!({
            "count": runs.len(),
            "runs": runs,
        }));
    }
    if cli.output.is_none() {
        return Ok(());
    }
    println!(
        "{:<18} {:<16} {:<11} {:<20} {:<10} {:>8} {:>8}",
        "RUN", "CHAT", "KIND", "QUEUED", "STATUS", "SEEN", "SAVED"
    );
    for r in &runs {
        let kind = r
            .target_kind
            .map(|k| format!("{:?}", k).to_lowercase())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<18} {:<16} {:<11} {:<20} {:<10} {:>8} {:>8}",
            r.run_id,
            r.target_id,
            out::truncate(&kind, 11),
            r.time_queued.format("%Y-%m-%d %H:%M:%S"),
            r.status(),
            r.stats.messages_seen,
            r.stats.messages_saved,
        );
        if let Some(reason) = &r.failure_reason {
            println!("  {}", out::truncate(reason, 100));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviourConfig;

    fn record(id: &str, chat: i64) -> ArchiveRunRecord {
        ArchiveRunRecord::new(id.to_string(), chat, BehaviourConfig::default())
    }

    #[test]
    fn filters_by_chat_then_limits() {
        let runs = vec![record("c", 1), record("b", 2), record("a", 1)];
        let args = RunsArgs {
            chat: Some(1),
            limit: 1,
        };
        let picked = select(runs, &args);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].run_id, "c");
    }
}

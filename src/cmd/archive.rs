use crate::app::socket::{self, SocketRequest};
use crate::app::App;
use crate::archive::{Archiver, TargetRequest};
use crate::config::{ArchiverConfig, BehaviourConfig, BehaviourOverrides};
use crate::error::ArchiveError;
use crate::model::ArchiveRunRecord;
use crate::out;
use crate::shutdown;
use crate::store::{Store, TursoStores};
use crate::Cli;
use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// Chat id to archive (repeatable)
    #[arg(long = "chat", required = true, num_args = 1..)]
    pub chats: Vec<i64>,

    /// Do not download photos and documents
    #[arg(long)]
    pub no_media: bool,

    /// Skip the admin log of supergroups and channels
    #[arg(long)]
    pub no_admin_log: bool,

    /// Skip the history scan
    #[arg(long)]
    pub no_history: bool,

    /// Keep archiving new messages, edits and deletions until stopped
    #[arg(long)]
    pub follow: bool,

    /// Collapse stored duplicate copies while archiving
    #[arg(long)]
    pub cleanup_duplicates: bool,

    /// Days of already archived history to scan again (0 scans everything)
    #[arg(long)]
    pub overlap_days: Option<u32>,

    /// Send unchanged messages to the downloaders again
    #[arg(long)]
    pub recheck_media: bool,

    /// Workers per subsystem
    #[arg(long)]
    pub workers: Option<usize>,

    /// Do not serve the control socket
    #[arg(long)]
    pub no_socket: bool,
}

impl ArchiveArgs {
    fn overrides(&self) -> BehaviourOverrides {
        let flag = |set: bool, value: bool| set.then_some(value);
        BehaviourOverrides {
            download_media: flag(self.no_media, false),
            check_admin_log: flag(self.no_admin_log, false),
            follow_live: flag(self.follow, true),
            archive_history: flag(self.no_history, false),
            cleanup_duplicates: flag(self.cleanup_duplicates, true),
            msg_history_overlap_days: self.overlap_days,
            recheck_media: flag(self.recheck_media, true),
        }
    }

    fn config(&self, base: &ArchiverConfig) -> ArchiverConfig {
        let mut config = base.clone();
        config.behaviour = base.behaviour.merge(&self.overrides());
        if let Some(workers) = self.workers {
            config.subsystems.workers = workers.max(1);
        }
        config
    }

    fn requests(&self, behaviour: &BehaviourConfig) -> Vec<TargetRequest> {
        let mut seen = std::collections::HashSet::new();
        self.chats
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|&chat_id| TargetRequest {
                chat_id,
                behaviour: behaviour.clone(),
            })
            .collect()
    }
}

pub async fn run(cli: &Cli, args: &ArchiveArgs) -> Result<()> {
    let mut app = App::new(cli).await?;
    let config = args.config(&app.config);
    let requests = args.requests(&config.behaviour);
    let layout = app.layout.clone();

    let socket_path = layout.socket_path();
    if !args.no_socket
        && socket::is_socket_available(&socket_path)
        && socket::send_request(&socket_path, &SocketRequest::Ping)
            .await
            .is_ok()
    {
        anyhow::bail!(
            "Another archive is already running on {}. Stop it with `tgarchive stop`.",
            layout.root().display()
        );
    }

    let core = Arc::new(
        Store::open(&layout.core_db())
            .await
            .context("Failed to open the core store")?,
    );
    let stores = Arc::new(TursoStores::new(layout.clone()));
    let remote = app.tg.remote();
    let shutdown = shutdown::global();
    let follow = config.behaviour.follow_live;

    let archiver = Arc::new(Archiver::new(
        remote.clone(),
        stores,
        core,
        layout,
        config,
        shutdown.clone(),
    ));

    let server = if args.no_socket {
        None
    } else {
        let source = Arc::clone(&archiver);
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = socket::run_server(socket_path, source, shutdown).await {
                log::error!("Socket server error: {:#}", e);
            }
        }))
    };

    let live = match app.updates_rx.take() {
        Some(updates) if follow => Some(remote.forward_updates(updates)),
        _ => None,
    };

    log::info!("Archiving {} chats", requests.len());
    let result = archiver.run(requests, live).await;

    if let Some(server) = server {
        server.abort();
        let _ = server.await;
    }

    report(cli, &archiver.status().runs)?;

    match result {
        Ok(()) => Ok(()),
        Err(ArchiveError::Aborted) => {
            log::warn!("Archive aborted");
            Ok(())
        }
        Err(e) => Err(e).context("Archive failed"),
    }
}

fn report(cli: &Cli, runs: &[ArchiveRunRecord]) -> Result<()> {
    if cli.output.is_json() {
        return out::write_json(&serde_json::json!({ "runs": runs }));
    }
    if cli.output.is_none() {
        return Ok(());
    }
    for run in runs {
        let reason = run
            .failure_reason
            .as_deref()
            .map(|r| format!(" ({})", r))
            .unwrap_or_default();
        println!(
            "chat {}: {}{}, {} messages seen, {} saved, {} media",
            run.target_id,
            run.status(),
            reason,
            run.stats.messages_seen,
            run.stats.messages_saved,
            run.stats.media_seen,
        );
    }
    Ok(())
}

//! The archive engine.
//!
//! An [`Archiver`] owns three background subsystems (peers, media,
//! stickers), the message refresh cache and the run loop that archives
//! each requested chat through an [`ArchiveTarget`].

pub mod cache;
pub mod cutoff;
pub mod download;
pub mod media;
pub mod peers;
pub mod queue;
pub mod refresh;
pub mod remote;
pub mod run_record;
pub mod stickers;
pub mod subsystem;
pub mod target;
pub mod versioning;

#[cfg(test)]
pub mod testing;

use crate::config::{ArchiverConfig, BehaviourConfig};
use crate::error::{ArchiveError, FetchError};
use crate::model::ArchiveRunRecord;
use crate::shutdown::ShutdownController;
use crate::store::{ArchiveStore, StoreLayout, StoreProvider};
use download::FileFetcher;
use media::MediaDownloader;
use parking_lot::Mutex;
use peers::PeerFetcher;
use refresh::MessageRefreshCache;
use remote::{LiveEvent, RemoteSource};
use serde::Serialize;
use stickers::StickerDownloader;
use std::sync::Arc;
use std::time::Duration;
use subsystem::{RetryPolicy, SubsystemRunner, SubsystemStatus};
use target::ArchiveTarget;
use tokio::sync::mpsc;

/// One chat to archive.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    pub chat_id: i64,
    pub behaviour: BehaviourConfig,
}

/// Shared handles every target works with.
pub struct ArchiveContext {
    pub remote: Arc<dyn RemoteSource>,
    pub stores: Arc<dyn StoreProvider>,
    pub core: Arc<dyn ArchiveStore>,
    pub peers: Arc<PeerFetcher>,
    pub media: Arc<MediaDownloader>,
    pub stickers: Arc<StickerDownloader>,
    pub refresher: Arc<MessageRefreshCache>,
    pub retry: RetryPolicy,
    pub shutdown: ShutdownController,
    pub config: ArchiverConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiverStatus {
    pub shutting_down: bool,
    pub aborted: bool,
    pub subsystems: Vec<SubsystemStatus>,
    pub refresh_cache_messages: usize,
    pub refresh_windows: u64,
    pub invalid_sticker_sets: u64,
    pub runs: Vec<ArchiveRunRecord>,
}

pub fn new_run_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub struct Archiver {
    ctx: Arc<ArchiveContext>,
    peer_runner: SubsystemRunner<PeerFetcher>,
    media_runner: SubsystemRunner<MediaDownloader>,
    sticker_runner: SubsystemRunner<StickerDownloader>,
    active: Mutex<Vec<Arc<ArchiveTarget>>>,
    finished: Mutex<Vec<ArchiveRunRecord>>,
}

impl Archiver {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        stores: Arc<dyn StoreProvider>,
        core: Arc<dyn ArchiveStore>,
        layout: StoreLayout,
        config: ArchiverConfig,
        shutdown: ShutdownController,
    ) -> Self {
        let sub = config.subsystems.clone();
        let cleanup = config.behaviour.cleanup_duplicates;
        let retry = || RetryPolicy::new(sub.retry_backoff(), sub.max_retries, shutdown.abort_child());
        let refresher = MessageRefreshCache::new(
            Arc::clone(&remote),
            retry(),
            sub.refresh_batch_size,
            sub.refresh_page_size,
        );
        let files = || {
            FileFetcher::new(
                Arc::clone(&remote),
                retry(),
                Arc::clone(&refresher),
                sub.refresh_attempts,
            )
        };
        let peers = Arc::new(PeerFetcher::new(
            Arc::clone(&remote),
            retry(),
            Arc::clone(&core),
            Duration::from_secs(sub.peer_cache_ttl_secs),
            cleanup,
        ));
        let media = Arc::new(MediaDownloader::new(
            files(),
            layout.clone(),
            Duration::from_secs(sub.media_cache_ttl_secs),
        ));
        let stickers = Arc::new(StickerDownloader::new(
            files(),
            Arc::clone(&remote),
            Arc::clone(&core),
            layout,
            Duration::from_secs(sub.sticker_cache_ttl_secs),
            cleanup,
        ));

        let peer_runner =
            SubsystemRunner::new(Arc::clone(&peers), sub.workers, sub.idle_poll(), shutdown.clone());
        let media_runner =
            SubsystemRunner::new(Arc::clone(&media), sub.workers, sub.idle_poll(), shutdown.clone());
        let sticker_runner = SubsystemRunner::new(
            Arc::clone(&stickers),
            sub.workers,
            sub.idle_poll(),
            shutdown.clone(),
        );

        let target_retry = retry();
        let ctx = Arc::new(ArchiveContext {
            remote,
            stores,
            core,
            peers,
            media,
            stickers,
            refresher,
            retry: target_retry,
            shutdown,
            config,
        });
        Self {
            ctx,
            peer_runner,
            media_runner,
            sticker_runner,
            active: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.ctx.shutdown
    }

    /// Archive every requested chat in turn, follow the live ones until
    /// shutdown, then stop the subsystems.
    pub async fn run(
        &self,
        requests: Vec<TargetRequest>,
        live: Option<mpsc::Receiver<LiveEvent>>,
    ) -> Result<(), ArchiveError> {
        self.peer_runner.start()?;
        self.media_runner.start()?;
        self.sticker_runner.start()?;

        let result = self.run_targets(requests, live).await;
        let fast = result.is_err() || self.ctx.shutdown.is_aborted();
        let stopped = self.stop(fast).await;
        match (result, stopped) {
            // A subsystem failure is the root cause of whatever the
            // targets saw.
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn run_targets(
        &self,
        requests: Vec<TargetRequest>,
        live: Option<mpsc::Receiver<LiveEvent>>,
    ) -> Result<(), ArchiveError> {
        let mut following = Vec::new();
        for request in requests {
            if self.ctx.shutdown.is_triggered() {
                log::info!("Shutdown requested, not starting chat {}", request.chat_id);
                break;
            }
            let target = Arc::new(
                ArchiveTarget::open(
                    Arc::clone(&self.ctx),
                    new_run_id(),
                    request.chat_id,
                    request.behaviour,
                )
                .await?,
            );
            self.active.lock().push(Arc::clone(&target));

            let outcome = match target.archive().await {
                Ok(()) if target.follows_live() => {
                    following.push(Arc::clone(&target));
                    continue;
                }
                Ok(()) => target.finish().await,
                Err(e) => Err(e),
            };
            self.retire(&target, outcome).await?;
        }

        if following.is_empty() {
            return Ok(());
        }
        let result = match live {
            Some(live) => self.follow(&following, live).await,
            None => {
                log::warn!("No live update stream, not following chats");
                Ok(())
            }
        };
        for target in following {
            let outcome = match &result {
                Ok(()) => target.finish().await,
                Err(_) => Err(ArchiveError::Aborted),
            };
            self.retire(&target, outcome).await?;
        }
        result
    }

    /// Record how a target ended. Chats that turned out to be inaccessible
    /// only fail their own run.
    async fn retire(
        &self,
        target: &ArchiveTarget,
        outcome: Result<(), ArchiveError>,
    ) -> Result<(), ArchiveError> {
        let result = match outcome {
            Ok(()) => Ok(()),
            Err(e @ ArchiveError::Fetch(FetchError::Inaccessible(_))) => {
                log::warn!("Skipping chat {}: {}", target.chat_id(), e);
                target.fail(&e).await;
                Ok(())
            }
            Err(e) => {
                log::error!("Archiving chat {} failed: {}", target.chat_id(), e);
                target.fail(&e).await;
                Err(e)
            }
        };
        let chat_id = target.chat_id();
        self.active.lock().retain(|t| t.chat_id() != chat_id);
        self.finished.lock().push(target.record());
        result
    }

    async fn follow(
        &self,
        targets: &[Arc<ArchiveTarget>],
        mut live: mpsc::Receiver<LiveEvent>,
    ) -> Result<(), ArchiveError> {
        log::info!("Following {} chats until shutdown", targets.len());
        loop {
            let event = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                event = live.recv() => match event {
                    Some(event) => event,
                    None => {
                        log::warn!("Live update stream closed");
                        break;
                    }
                },
            };
            for target in targets {
                target.handle_live(&event).await?;
            }
        }
        if self.ctx.shutdown.is_aborted() {
            return Err(ArchiveError::Aborted);
        }
        Ok(())
    }

    /// Stop the subsystems: drain, or abort if `fast`.
    pub async fn stop(&self, fast: bool) -> Result<(), ArchiveError> {
        let mut first_error = None;
        // Peers go last because the other subsystems never feed them, but
        // targets finishing late might.
        for result in [
            self.media_runner.stop(fast).await,
            self.sticker_runner.stop(fast).await,
            self.peer_runner.stop(fast).await,
        ] {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        if !fast {
            self.ctx.refresher.wait_idle().await;
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> ArchiverStatus {
        let mut runs = self.finished.lock().clone();
        runs.extend(self.active.lock().iter().map(|t| t.record()));
        ArchiverStatus {
            shutting_down: self.ctx.shutdown.is_triggered(),
            aborted: self.ctx.shutdown.is_aborted(),
            subsystems: vec![
                self.peer_runner.status(),
                self.media_runner.status(),
                self.sticker_runner.status(),
            ],
            refresh_cache_messages: self.ctx.refresher.size(),
            refresh_windows: self.ctx.refresher.windows_fetched(),
            invalid_sticker_sets: self.ctx.stickers.invalid_sets(),
            runs,
        }
    }
}

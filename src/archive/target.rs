//! Archiving one chat: metadata, admin log, history and live updates.

use super::cutoff::CutoffPolicy;
use super::queue::{QueueKey, QueueTarget};
use super::remote::{LiveEvent, RemoteSource};
use super::run_record::{Counter, Phase, RunRecorder};
use super::stickers::StickerItem;
use super::subsystem::Subsystem;
use super::versioning::{load_latest, save_if_not_duplicate};
use super::ArchiveContext;
use crate::config::BehaviourConfig;
use crate::error::{ArchiveError, FetchError};
use crate::model::{
    AdminAction, AdminEvent, ArchiveRunRecord, ChatInfo, Message, RemoteAdminEvent, RemoteMessage,
    VersionedResource,
};
use crate::store::{ArchiveStore, VersionedRepo};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub const INTERRUPTED: &str = "interrupted by shutdown";

pub struct ArchiveTarget {
    ctx: Arc<ArchiveContext>,
    chat_id: i64,
    behaviour: BehaviourConfig,
    key: QueueKey,
    store: Arc<dyn ArchiveStore>,
    queue_target: Arc<QueueTarget>,
    recorder: RunRecorder,
    cutoff: Mutex<CutoffPolicy>,
    info: OnceLock<ChatInfo>,
    interrupted: AtomicBool,
}

impl ArchiveTarget {
    /// Open the chat's store and record the run as queued.
    pub async fn open(
        ctx: Arc<ArchiveContext>,
        run_id: String,
        chat_id: i64,
        behaviour: BehaviourConfig,
    ) -> Result<Self, ArchiveError> {
        let store = ctx.stores.chat_store(chat_id).await?;
        let record = ArchiveRunRecord::new(run_id.clone(), chat_id, behaviour.clone());
        let cutoff = CutoffPolicy::load(
            &*store,
            record.time_queued,
            behaviour.msg_history_overlap_days,
        )
        .await?;
        let recorder = RunRecorder::new(
            record,
            Arc::clone(&ctx.core),
            ctx.config.subsystems.run_save_interval(),
        );
        recorder.queued().await?;
        Ok(Self {
            queue_target: Arc::new(QueueTarget {
                chat_id,
                store: Arc::clone(&store),
            }),
            ctx,
            chat_id,
            behaviour,
            key: QueueKey::Run(run_id),
            store,
            recorder,
            cutoff: Mutex::new(cutoff),
            info: OnceLock::new(),
            interrupted: AtomicBool::new(false),
        })
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn follows_live(&self) -> bool {
        self.behaviour.follow_live
    }

    pub fn record(&self) -> ArchiveRunRecord {
        self.recorder.snapshot()
    }

    fn layer(&self) -> i32 {
        self.ctx.remote.schema_layer()
    }

    fn check_shutdown(&self) -> Result<bool, ArchiveError> {
        if self.ctx.shutdown.is_aborted() {
            return Err(ArchiveError::Aborted);
        }
        Ok(self.ctx.shutdown.is_triggered())
    }

    /// Whether a drain stopped the admin log or history scan early.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    fn mark_interrupted(&self, what: &str) {
        log::info!("Chat {}: {} interrupted by shutdown", self.chat_id, what);
        self.interrupted.store(true, Ordering::Relaxed);
    }

    /// Everything up to live following: chat metadata, admin log and history.
    pub async fn archive(&self) -> Result<(), ArchiveError> {
        let remote: &dyn RemoteSource = &*self.ctx.remote;
        let chat_id = self.chat_id;
        let info = self
            .ctx
            .retry
            .run("chat lookup", move || remote.chat_info(chat_id))
            .await?;
        log::info!("Archiving {} ({}, {:?})", info.title, chat_id, info.kind);
        self.recorder.set_target_kind(info.kind);
        self.ctx
            .peers
            .queue_peer(self.key.clone(), Arc::clone(&self.queue_target), info.peer, false)?;
        let small = info.kind.is_small();
        let _ = self.info.set(info);

        if self.behaviour.check_admin_log && !small {
            self.archive_admin_log().await?;
        }
        if self.behaviour.archive_history {
            self.recorder.start(Phase::History).await?;
            self.archive_history().await?;
            self.recorder.end(Phase::History).await?;
        }
        if self.behaviour.follow_live {
            self.recorder.start(Phase::Follow).await?;
        }
        Ok(())
    }

    async fn archive_admin_log(&self) -> Result<(), ArchiveError> {
        let remote: &dyn RemoteSource = &*self.ctx.remote;
        let chat_id = self.chat_id;
        let limit = self.ctx.config.subsystems.refresh_page_size;
        let mut max_id = 0;
        let mut total = 0;
        loop {
            if self.check_shutdown()? {
                self.mark_interrupted("admin log scan");
                break;
            }
            let page = self
                .ctx
                .retry
                .run("admin log", move || remote.admin_log_page(chat_id, max_id, limit))
                .await;
            let page = match page {
                Ok(page) => page,
                Err(ArchiveError::Fetch(FetchError::Inaccessible(reason))) => {
                    log::warn!("No admin log for chat {}: {}", chat_id, reason);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let Some(oldest) = page.iter().map(|e| e.id).min() else {
                break;
            };
            for event in &page {
                self.save_admin_event(event).await?;
            }
            total += page.len();
            self.recorder
                .add(Counter::AdminEventsSeen, page.len() as u64)
                .await?;
            if page.len() < limit {
                break;
            }
            max_id = oldest;
        }
        log::info!("Chat {}: {} admin log events", chat_id, total);
        Ok(())
    }

    async fn save_admin_event(&self, event: &RemoteAdminEvent) -> Result<(), ArchiveError> {
        self.store
            .save_admin_event(&AdminEvent::from_remote(event, self.layer()))
            .await?;
        match &event.action {
            AdminAction::DeleteMessage(msg) => {
                let deleted = Message::from_remote(msg, self.layer(), true);
                save_if_not_duplicate(&*self.store, &deleted, self.behaviour.cleanup_duplicates)
                    .await?;
            }
            AdminAction::EditMessage { previous, current } => {
                for version in [previous, current] {
                    let copy = Message::from_remote(version, self.layer(), false);
                    save_if_not_duplicate(&*self.store, &copy, self.behaviour.cleanup_duplicates)
                        .await?;
                }
            }
            AdminAction::Other(_) => {}
        }
        Ok(())
    }

    async fn archive_history(&self) -> Result<(), ArchiveError> {
        let remote: &dyn RemoteSource = &*self.ctx.remote;
        let chat_id = self.chat_id;
        let limit = self.ctx.config.subsystems.refresh_page_size;
        let known = self.store.list_message_ids().await?;
        if let Some(cutoff) = self.cutoff.lock().cutoff_date() {
            log::info!("Chat {}: scanning history back to {}", chat_id, cutoff);
        }

        let mut offset = 0;
        let mut previous: Option<i32> = None;
        let mut reached_start = false;
        let mut pages = 0;
        'scan: loop {
            if self.check_shutdown()? {
                self.mark_interrupted("history scan");
                break;
            }
            let page = self
                .ctx
                .retry
                .run("history", move || remote.history_page(chat_id, offset, limit))
                .await?;
            let Some(oldest) = page.iter().map(|m| m.id).min() else {
                reached_start = true;
                break;
            };
            pages += 1;
            for msg in &page {
                if let Some(newer) = previous {
                    self.mark_missing_deleted(&known, msg.id, newer).await?;
                }
                previous = Some(msg.id);
                let saved = self.process_message(msg).await?;
                if !saved && self.cutoff.lock().cutoff_met(msg.date) {
                    log::info!("Chat {}: reached cutoff at message {}", chat_id, msg.id);
                    break 'scan;
                }
            }
            self.recorder.touch(Phase::History).await?;
            if page.len() < limit {
                reached_start = true;
                break;
            }
            offset = oldest;
        }

        if reached_start {
            if let Some(oldest) = previous {
                self.mark_missing_deleted(&known, 0, oldest).await?;
            }
        }
        log::info!("Chat {}: scanned {} history pages", chat_id, pages);
        Ok(())
    }

    /// Stored ids strictly between two adjacent remote messages are gone.
    async fn mark_missing_deleted(
        &self,
        known: &BTreeSet<i32>,
        older: i32,
        newer: i32,
    ) -> Result<(), ArchiveError> {
        if newer <= older.saturating_add(1) {
            return Ok(());
        }
        let missing: Vec<i32> = known
            .range((Bound::Excluded(older), Bound::Excluded(newer)))
            .copied()
            .collect();
        for id in missing {
            self.mark_msg_deleted(id).await?;
        }
        Ok(())
    }

    /// Record that a stored message was deleted, unless already recorded.
    pub async fn mark_msg_deleted(&self, message_id: i32) -> Result<(), ArchiveError> {
        let latest: Option<Message> = load_latest(
            &*self.store,
            message_id as i64,
            self.behaviour.cleanup_duplicates,
        )
        .await?;
        if let Some(latest) = latest.filter(|m| !m.deleted) {
            log::info!("Chat {}: message {} was deleted", self.chat_id, message_id);
            VersionedRepo::<Message>::save(&*self.store, &latest.mark_deleted()).await?;
        }
        Ok(())
    }

    /// Archive one message if it differs from what is stored. Returns
    /// whether a new copy was saved.
    pub async fn process_message(&self, msg: &RemoteMessage) -> Result<bool, ArchiveError> {
        self.recorder.add(Counter::MessagesSeen, 1).await?;
        let copy = Message::from_remote(msg, self.layer(), false);
        let latest: Option<Message> = load_latest(
            &*self.store,
            msg.id as i64,
            self.behaviour.cleanup_duplicates,
        )
        .await?;
        if let Some(latest) = &latest {
            if latest.equivalent(&copy) {
                if self.behaviour.recheck_media {
                    self.msg_to_subsystems(msg).await?;
                }
                return Ok(false);
            }
            if latest.deleted {
                log::info!("Chat {}: message {} is back", self.chat_id, msg.id);
                self.store.delete_deleted_messages(msg.id).await?;
            }
        }
        VersionedRepo::<Message>::save(&*self.store, &copy).await?;
        self.recorder.add(Counter::MessagesSaved, 1).await?;
        self.cutoff.lock().bump(msg.date);
        self.msg_to_subsystems(msg).await?;
        Ok(true)
    }

    async fn msg_to_subsystems(&self, msg: &RemoteMessage) -> Result<(), ArchiveError> {
        if let Some(sender) = msg.sender {
            self.ctx.peers.queue_peer(
                self.key.clone(),
                Arc::clone(&self.queue_target),
                sender,
                false,
            )?;
        }
        if msg.sticker().is_some() {
            self.ctx.stickers.queue_sticker(
                self.key.clone(),
                Some(Arc::clone(&self.queue_target)),
                StickerItem::InMessage(msg.clone()),
            )?;
            self.recorder.add(Counter::MediaSeen, 1).await?;
        } else if msg.media.is_some() && self.behaviour.download_media {
            self.ctx.media.queue_media(
                self.key.clone(),
                Arc::clone(&self.queue_target),
                msg.clone(),
            )?;
            self.recorder.add(Counter::MediaSeen, 1).await?;
        }
        Ok(())
    }

    /// Apply a live update if it concerns this chat.
    pub async fn handle_live(&self, event: &LiveEvent) -> Result<(), ArchiveError> {
        match event {
            LiveEvent::NewMessage(msg) | LiveEvent::MessageEdited(msg)
                if msg.chat_id == self.chat_id =>
            {
                self.process_message(msg).await?;
            }
            LiveEvent::MessagesDeleted {
                chat_id,
                message_ids,
            } => {
                let ours = match chat_id {
                    Some(id) => *id == self.chat_id,
                    // Ids without a chat share the account-wide id space
                    // of private chats and basic groups.
                    None => self.info.get().is_some_and(|i| i.kind.is_small()),
                };
                if ours {
                    for id in message_ids {
                        self.mark_msg_deleted(*id).await?;
                    }
                }
            }
            LiveEvent::NewMessage(_) | LiveEvent::MessageEdited(_) => return Ok(()),
        }
        self.recorder.touch(Phase::Follow).await?;
        Ok(())
    }

    /// Wait for the subsystems to finish this run's work, then mark the
    /// run complete. A run cut short by a drain is recorded as failed.
    pub async fn finish(&self) -> Result<(), ArchiveError> {
        if self.record().follow.is_running() {
            self.recorder.end(Phase::Follow).await?;
        }
        log::info!("Chat {}: waiting for downloads", self.chat_id);
        let drained = self.ctx.media.queues().wait_until_empty(&self.key).await
            && self.ctx.stickers.queues().wait_until_empty(&self.key).await
            && self.ctx.peers.queues().wait_until_empty(&self.key).await;
        if !drained {
            return Err(ArchiveError::Aborted);
        }
        if self.was_interrupted() {
            log::warn!("Chat {}: archive run stopped before it was complete", self.chat_id);
            self.recorder.fail(INTERRUPTED).await?;
            return Ok(());
        }
        self.recorder.complete().await?;
        log::info!("Chat {}: archive run complete", self.chat_id);
        Ok(())
    }

    pub async fn fail(&self, error: &ArchiveError) {
        if let Err(e) = self.recorder.fail(&error.to_string()).await {
            log::error!("Failed to record failure of chat {}: {:#}", self.chat_id, e);
        }
    }
}

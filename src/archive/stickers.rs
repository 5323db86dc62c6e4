//! Downloads stickers and archives the sets they belong to.

use super::cache::TimedCache;
use super::download::FileFetcher;
use super::queue::{Job, QueueKey, QueueTarget, TargetQueues};
use super::remote::RemoteSource;
use super::subsystem::Subsystem;
use super::versioning::save_if_not_duplicate;
use crate::error::{ArchiveError, FetchError};
use crate::model::{DocumentRef, RemoteMessage, Sticker, StickerSetRef};
use crate::store::{ArchiveStore, StoreLayout};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum StickerItem {
    /// A sticker sent in a message. Expired references are repaired by
    /// refreshing the message.
    InMessage(RemoteMessage),
    /// A sticker found by listing its set.
    InSet(DocumentRef),
}

impl StickerItem {
    fn document(&self) -> Result<&DocumentRef, ArchiveError> {
        match self {
            StickerItem::InMessage(msg) => msg.sticker().ok_or_else(|| {
                ArchiveError::invariant(format!(
                    "message {} in chat {} queued as a sticker has none",
                    msg.id, msg.chat_id
                ))
            }),
            StickerItem::InSet(doc) => Ok(doc),
        }
    }
}

pub struct StickerDownloader {
    queues: TargetQueues<StickerItem>,
    files: FileFetcher,
    remote: Arc<dyn RemoteSource>,
    core: Arc<dyn ArchiveStore>,
    layout: StoreLayout,
    stickers: TimedCache<i64>,
    sets: TimedCache<i64>,
    invalid_sets: AtomicU64,
    cleanup: bool,
}

impl StickerDownloader {
    pub fn new(
        files: FileFetcher,
        remote: Arc<dyn RemoteSource>,
        core: Arc<dyn ArchiveStore>,
        layout: StoreLayout,
        ttl: Duration,
        cleanup: bool,
    ) -> Self {
        Self {
            queues: TargetQueues::new(),
            files,
            remote,
            core,
            layout,
            stickers: TimedCache::new(ttl),
            sets: TimedCache::new(ttl),
            invalid_sets: AtomicU64::new(0),
            cleanup,
        }
    }

    pub fn queue_sticker(
        &self,
        key: QueueKey,
        target: Option<Arc<QueueTarget>>,
        item: StickerItem,
    ) -> Result<(), ArchiveError> {
        if self.stickers.seen(&item.document()?.id()) {
            return Ok(());
        }
        self.queues.enqueue(key, target, item, false)
    }

    /// Sets that no longer exist on the server.
    pub fn invalid_sets(&self) -> u64 {
        self.invalid_sets.load(Ordering::Relaxed)
    }

    /// Download a sticker found in a set, reloading the set once if the
    /// reference expired. Returns `false` if the sticker is no longer there.
    async fn download_from_set(&self, doc: &DocumentRef, dest: &Path) -> Result<bool, ArchiveError> {
        let expired = match self.files.fetch(&doc.location, dest).await {
            Err(ArchiveError::Fetch(FetchError::ReferenceExpired(what))) => what,
            other => return other.map(|()| true),
        };
        let Some(set) = doc.sticker.as_ref().and_then(|s| s.set) else {
            return Err(FetchError::ReferenceExpired(expired).into());
        };
        log::info!("Reference for sticker {} expired, reloading set {}", doc.id(), set.id);
        let remote: &dyn RemoteSource = &*self.remote;
        let fetched = match self
            .files
            .retry()
            .run("sticker set fetch", move || remote.sticker_set(set))
            .await
        {
            Ok(fetched) => fetched,
            Err(ArchiveError::Fetch(FetchError::SetInvalid(reason))) => {
                log::warn!("Sticker set {} is gone: {}", set.id, reason);
                self.invalid_sets.fetch_add(1, Ordering::Relaxed);
                self.sets.mark(set.id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let Some(fresh) = fetched.documents.iter().find(|d| d.id() == doc.id()) else {
            log::warn!("Sticker {} was removed from set {}, skipping", doc.id(), set.id);
            return Ok(false);
        };
        self.files.fetch(&fresh.location, dest).await?;
        Ok(true)
    }

    async fn process_set(&self, set: StickerSetRef) -> Result<(), ArchiveError> {
        if self.sets.seen(&set.id) {
            return Ok(());
        }
        let remote: &dyn RemoteSource = &*self.remote;
        let fetched = match self
            .files
            .retry()
            .run("sticker set fetch", move || remote.sticker_set(set))
            .await
        {
            Ok(fetched) => fetched,
            Err(ArchiveError::Fetch(FetchError::SetInvalid(reason))) => {
                log::warn!("Sticker set {} is gone: {}", set.id, reason);
                self.invalid_sets.fetch_add(1, Ordering::Relaxed);
                self.sets.mark(set.id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        save_if_not_duplicate(&*self.core, &fetched.set, self.cleanup).await?;
        let mut queued = 0;
        for doc in fetched.documents {
            if !self.stickers.seen(&doc.id()) {
                self.queues
                    .enqueue(QueueKey::Global, None, StickerItem::InSet(doc), false)?;
                queued += 1;
            }
        }
        log::info!(
            "Archived sticker set {} ({}), {} stickers queued",
            fetched.set.title,
            set.id,
            queued
        );
        self.sets.mark(set.id);
        Ok(())
    }
}

#[async_trait]
impl Subsystem for StickerDownloader {
    type Item = StickerItem;

    fn name(&self) -> &'static str {
        "stickers"
    }

    fn queues(&self) -> &TargetQueues<StickerItem> {
        &self.queues
    }

    async fn process(&self, job: &Job<StickerItem>) -> Result<(), ArchiveError> {
        let doc = job.item.document()?;
        let id = doc.id();
        if self.stickers.seen(&id) {
            return Ok(());
        }

        let dest = self.layout.sticker_path(doc.set_id(), id, &doc.extension());
        if !FileFetcher::exists(&dest).await? {
            match &job.item {
                StickerItem::InMessage(msg) => {
                    let downloaded = self
                        .files
                        .fetch_from_message(msg, &dest, |m| {
                            m.sticker().map(|d| d.location.clone())
                        })
                        .await?;
                    if !downloaded {
                        self.stickers.mark(id);
                        return Ok(());
                    }
                }
                StickerItem::InSet(doc) => {
                    if !self.download_from_set(doc, &dest).await? {
                        self.stickers.mark(id);
                        return Ok(());
                    }
                }
            }
        }

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sticker = Sticker::from_document(doc, file_name, self.remote.schema_layer());
        save_if_not_duplicate(&*self.core, &sticker, self.cleanup).await?;
        self.stickers.mark(id);

        if let Some(set) = doc.sticker.as_ref().and_then(|s| s.set) {
            self.process_set(set).await?;
        }
        Ok(())
    }

    fn cache_size(&self) -> usize {
        self.stickers.len() + self.sets.len()
    }

    fn retries(&self) -> u64 {
        self.files.retry().retries()
    }
}

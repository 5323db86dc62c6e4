//! Downloads photos and documents attached to messages.

use super::cache::TimedCache;
use super::download::FileFetcher;
use super::queue::{Job, QueueKey, QueueTarget, TargetQueues};
use super::subsystem::Subsystem;
use crate::error::ArchiveError;
use crate::model::{MediaDisposition, MediaRef, RemoteMessage};
use crate::store::StoreLayout;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MediaItem {
    pub message: RemoteMessage,
}

pub struct MediaDownloader {
    queues: TargetQueues<MediaItem>,
    files: FileFetcher,
    layout: StoreLayout,
    /// (chat id, media id) pairs already on disk.
    seen: TimedCache<(i64, i64)>,
}

impl MediaDownloader {
    pub fn new(files: FileFetcher, layout: StoreLayout, ttl: Duration) -> Self {
        Self {
            queues: TargetQueues::new(),
            files,
            layout,
            seen: TimedCache::new(ttl),
        }
    }

    pub fn queue_media(
        &self,
        key: QueueKey,
        target: Arc<QueueTarget>,
        message: RemoteMessage,
    ) -> Result<(), ArchiveError> {
        if let Some(media_id) = message.media_id() {
            if self.seen.seen(&(message.chat_id, media_id)) {
                return Ok(());
            }
        }
        self.queues
            .enqueue(key, Some(target), MediaItem { message }, false)
    }
}

#[async_trait]
impl Subsystem for MediaDownloader {
    type Item = MediaItem;

    fn name(&self) -> &'static str {
        "media"
    }

    fn queues(&self) -> &TargetQueues<MediaItem> {
        &self.queues
    }

    async fn process(&self, job: &Job<MediaItem>) -> Result<(), ArchiveError> {
        let message = &job.item.message;
        let chat_id = message.chat_id;
        match &message.media {
            None => return Ok(()),
            Some(MediaRef::Expired { kind }) => {
                log::debug!("Message {} in chat {}: {} has expired", message.id, chat_id, kind);
                return Ok(());
            }
            Some(MediaRef::Unsupported { kind, disposition }) => {
                match disposition {
                    MediaDisposition::Unknown => log::warn!(
                        "Message {} in chat {} has unknown media {}",
                        message.id,
                        chat_id,
                        kind
                    ),
                    _ => log::debug!("Not downloading {} in message {}", kind, message.id),
                }
                return Ok(());
            }
            Some(MediaRef::Photo { .. } | MediaRef::Document { .. }) => {}
        }
        let Some(file) = message.media_file() else {
            return Ok(());
        };
        let cache_key = (chat_id, file.media_id);
        if self.seen.seen(&cache_key) {
            return Ok(());
        }

        let dest = self.layout.media_path(chat_id, file.media_id, &file.extension);
        if FileFetcher::exists(&dest).await? {
            log::debug!("{} already downloaded", dest.display());
            self.seen.mark(cache_key);
            return Ok(());
        }
        let downloaded = self
            .files
            .fetch_from_message(message, &dest, |m| m.media_file().map(|f| f.location))
            .await?;
        if downloaded {
            log::debug!("Saved media {} of chat {}", file.media_id, chat_id);
        }
        self.seen.mark(cache_key);
        Ok(())
    }

    fn cache_size(&self) -> usize {
        self.seen.len()
    }

    fn retries(&self) -> u64 {
        self.files.retry().retries()
    }
}

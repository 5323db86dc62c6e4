//! Fetches full user, group and channel profiles.

use super::cache::SeenCache;
use super::queue::{Job, QueueKey, QueueTarget, TargetQueues};
use super::remote::RemoteSource;
use super::subsystem::{RetryPolicy, Subsystem};
use super::versioning::save_if_not_duplicate;
use crate::error::{ArchiveError, FetchError};
use crate::model::{Chat, PeerKey, User};
use crate::store::ArchiveStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

enum Profile {
    User(User),
    Chat(Chat),
}

/// Chats linked to `peer` that are archived along with it.
fn related_peers(peer: PeerKey, chat: &Chat) -> Vec<PeerKey> {
    match peer {
        PeerKey::User(_) => Vec::new(),
        PeerKey::Chat(_) => chat.migrated_to_chat_id.map(PeerKey::Channel).into_iter().collect(),
        PeerKey::Channel(_) => chat
            .linked_chat_id
            .map(PeerKey::Channel)
            .into_iter()
            .chain(chat.migrated_from_chat_id.map(PeerKey::Chat))
            .collect(),
    }
}

pub struct PeerFetcher {
    queues: TargetQueues<PeerKey>,
    remote: Arc<dyn RemoteSource>,
    retry: RetryPolicy,
    core: Arc<dyn ArchiveStore>,
    seen: SeenCache<PeerKey>,
    cleanup: bool,
}

impl PeerFetcher {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        retry: RetryPolicy,
        core: Arc<dyn ArchiveStore>,
        ttl: Duration,
        cleanup: bool,
    ) -> Self {
        Self {
            queues: TargetQueues::new(),
            remote,
            retry,
            core,
            seen: SeenCache::new(ttl),
            cleanup,
        }
    }

    /// Queue `peer` for the chat in `target`, unless it is already stored
    /// both account-wide and for that chat.
    pub fn queue_peer(
        &self,
        key: QueueKey,
        target: Arc<QueueTarget>,
        peer: PeerKey,
        force: bool,
    ) -> Result<(), ArchiveError> {
        if !force && self.seen.fully_seen(target.chat_id, &peer) {
            return Ok(());
        }
        self.queues.enqueue(key, Some(target), peer, force)
    }

    fn mark_seen(&self, chat_id: i64, peer: PeerKey) {
        self.seen.mark_core(peer);
        self.seen.mark_in_chat(chat_id, peer);
    }

    async fn save_chat(
        &self,
        target: &QueueTarget,
        chat: &Chat,
        in_core: bool,
        in_chat: bool,
    ) -> Result<(), ArchiveError> {
        if !in_core {
            self.core.save_chat(chat).await?;
        }
        if !in_chat {
            target.store.save_chat(chat).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Subsystem for PeerFetcher {
    type Item = PeerKey;

    fn name(&self) -> &'static str {
        "peers"
    }

    fn queues(&self) -> &TargetQueues<PeerKey> {
        &self.queues
    }

    async fn process(&self, job: &Job<PeerKey>) -> Result<(), ArchiveError> {
        let target = job
            .target
            .as_ref()
            .ok_or_else(|| ArchiveError::invariant(format!("peer job for {} has no chat", job.key)))?;
        let peer = job.item;
        let chat_id = target.chat_id;
        // Another worker may have handled it since it was queued.
        let in_core = self.seen.seen_core(&peer);
        let in_chat = self.seen.seen_in_chat(chat_id, &peer);
        if in_core && in_chat {
            return Ok(());
        }

        let remote: &dyn RemoteSource = &*self.remote;
        let fetched = match peer {
            PeerKey::User(id) => self
                .retry
                .run("user fetch", move || remote.full_user(id))
                .await
                .map(Profile::User),
            PeerKey::Chat(id) => self
                .retry
                .run("chat fetch", move || remote.full_chat(id))
                .await
                .map(Profile::Chat),
            PeerKey::Channel(id) => self
                .retry
                .run("channel fetch", move || remote.full_channel(id))
                .await
                .map(Profile::Chat),
        };
        let profile = match fetched {
            Ok(profile) => profile,
            Err(ArchiveError::Fetch(FetchError::Inaccessible(reason))) => {
                log::warn!("Skipping {}: {}", peer, reason);
                self.mark_seen(chat_id, peer);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let related = match &profile {
            Profile::User(user) => {
                if !in_core {
                    save_if_not_duplicate(&*self.core, user, self.cleanup).await?;
                }
                if !in_chat {
                    save_if_not_duplicate(&*target.store, user, self.cleanup).await?;
                }
                log::debug!("Saved {} ({})", peer, user.display_name());
                Vec::new()
            }
            Profile::Chat(chat) => {
                self.save_chat(target, chat, in_core, in_chat).await?;
                log::debug!("Saved {} ({})", peer, chat.title);
                related_peers(peer, chat)
            }
        };
        self.mark_seen(chat_id, peer);

        // Forced so a run queue that is already draining still takes them.
        for other in related {
            if !self.seen.fully_seen(chat_id, &other) {
                self.queue_peer(job.key.clone(), Arc::clone(target), other, true)?;
            }
        }
        Ok(())
    }

    fn cache_size(&self) -> usize {
        self.seen.len()
    }

    fn retries(&self) -> u64 {
        self.retry.retries()
    }
}

//! Scripted remote used by the archive tests.

use super::remote::{FetchedStickerSet, RemoteSource};
use crate::error::FetchError;
use crate::model::{
    Chat, ChatInfo, ChatKind, FileLocation, PeerKey, RemoteAdminEvent, RemoteMessage,
    ResourceKind, ResourceMeta, StickerSetRef, User,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const LAYER: i32 = 201;

#[derive(Default)]
pub struct FakeRemote {
    pub chats: Mutex<HashMap<i64, ChatInfo>>,
    pub history: Mutex<HashMap<i64, Vec<RemoteMessage>>>,
    pub admin_log: Mutex<HashMap<i64, Vec<RemoteAdminEvent>>>,
    pub users: Mutex<HashMap<i64, User>>,
    pub basic_chats: Mutex<HashMap<i64, Chat>>,
    pub channels: Mutex<HashMap<i64, Chat>>,
    pub sticker_sets: Mutex<HashMap<i64, FetchedStickerSet>>,
    /// Chats and peers that answer with an access error.
    pub inaccessible: Mutex<HashSet<i64>>,
    /// File references rejected as expired.
    pub expired: Mutex<HashSet<Vec<u8>>>,
    /// Unclassified download failures to produce before succeeding.
    pub download_failures: Mutex<usize>,
    pub history_delay: Mutex<Option<Duration>>,
    pub downloads: Mutex<Vec<(i64, PathBuf)>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().get(name).copied().unwrap_or(0)
    }

    fn count(&self, name: &'static str) {
        *self.calls.lock().entry(name).or_default() += 1;
    }

    fn check_access(&self, id: i64) -> Result<(), FetchError> {
        if self.inaccessible.lock().contains(&id) {
            return Err(FetchError::Inaccessible(format!("peer {}", id)));
        }
        Ok(())
    }

    pub fn set_chat(&self, chat_id: i64, kind: ChatKind) {
        let peer = match kind {
            ChatKind::Private => PeerKey::User(chat_id),
            ChatKind::BasicGroup => PeerKey::Chat(chat_id),
            ChatKind::Supergroup | ChatKind::Channel => PeerKey::Channel(chat_id),
        };
        self.chats.lock().insert(
            chat_id,
            ChatInfo {
                chat_id,
                peer,
                kind,
                title: format!("chat {}", chat_id),
            },
        );
    }

    pub fn push_history(&self, chat_id: i64, messages: impl IntoIterator<Item = RemoteMessage>) {
        self.history
            .lock()
            .entry(chat_id)
            .or_default()
            .extend(messages);
    }

    /// Replace the copy of a message the remote returns.
    pub fn replace_message(&self, message: RemoteMessage) {
        let mut history = self.history.lock();
        let messages = history.entry(message.chat_id).or_default();
        messages.retain(|m| m.id != message.id);
        messages.push(message);
    }

    pub fn add_user(&self, id: i64, first_name: &str) {
        self.users.lock().insert(id, user(id, first_name));
    }
}

pub fn user(id: i64, first_name: &str) -> User {
    User {
        meta: ResourceMeta::capture(
            ResourceKind::User,
            id,
            LAYER,
            format!("User {{ id: {}, first_name: {:?} }}", id, first_name),
            None,
        ),
        bio: None,
        birthday: None,
        is_bot: false,
        is_deleted: false,
        first_name: Some(first_name.to_string()),
        last_name: None,
        phone: None,
        has_premium: false,
        username: None,
        other_usernames: Vec::new(),
    }
}

pub fn chat(id: i64, title: &str) -> Chat {
    Chat {
        meta: ResourceMeta::capture(
            ResourceKind::Chat,
            id,
            LAYER,
            format!("Chat {{ id: {} }}", id),
            None,
        ),
        title: title.to_string(),
        creation_date: None,
        is_creator: false,
        have_left: false,
        broadcast_channel: false,
        participants_count: None,
        about: None,
        username: None,
        migrated_to_chat_id: None,
        migrated_from_chat_id: None,
        linked_chat_id: None,
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    fn schema_layer(&self) -> i32 {
        LAYER
    }

    async fn chat_info(&self, chat_id: i64) -> Result<ChatInfo, FetchError> {
        self.count("chat_info");
        self.check_access(chat_id)?;
        self.chats
            .lock()
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| FetchError::Inaccessible(format!("chat {}", chat_id)))
    }

    async fn history_page(
        &self,
        chat_id: i64,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, FetchError> {
        self.count("history_page");
        let delay = *self.history_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_access(chat_id)?;
        let mut page: Vec<RemoteMessage> = self
            .history
            .lock()
            .get(&chat_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| offset_id == 0 || m.id < offset_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        page.sort_by(|a, b| b.id.cmp(&a.id));
        page.truncate(limit);
        Ok(page)
    }

    async fn admin_log_page(
        &self,
        chat_id: i64,
        max_id: i64,
        limit: usize,
    ) -> Result<Vec<RemoteAdminEvent>, FetchError> {
        self.count("admin_log_page");
        self.check_access(chat_id)?;
        let mut page: Vec<RemoteAdminEvent> = self
            .admin_log
            .lock()
            .get(&chat_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| max_id == 0 || e.id < max_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        page.sort_by(|a, b| b.id.cmp(&a.id));
        page.truncate(limit);
        Ok(page)
    }

    async fn full_user(&self, user_id: i64) -> Result<User, FetchError> {
        self.count("full_user");
        self.check_access(user_id)?;
        let known = self.users.lock().get(&user_id).cloned();
        Ok(known.unwrap_or_else(|| user(user_id, "Someone")))
    }

    async fn full_chat(&self, chat_id: i64) -> Result<Chat, FetchError> {
        self.count("full_chat");
        self.check_access(chat_id)?;
        let known = self.basic_chats.lock().get(&chat_id).cloned();
        Ok(known.unwrap_or_else(|| chat(chat_id, "Group")))
    }

    async fn full_channel(&self, channel_id: i64) -> Result<Chat, FetchError> {
        self.count("full_channel");
        self.check_access(channel_id)?;
        let known = self.channels.lock().get(&channel_id).cloned();
        Ok(known.unwrap_or_else(|| chat(channel_id, "Channel")))
    }

    async fn sticker_set(&self, set: StickerSetRef) -> Result<FetchedStickerSet, FetchError> {
        self.count("sticker_set");
        self.sticker_sets
            .lock()
            .get(&set.id)
            .cloned()
            .ok_or_else(|| FetchError::SetInvalid(set.id.to_string()))
    }

    async fn download(&self, location: &FileLocation, dest: &Path) -> Result<(), FetchError> {
        self.count("download");
        if self.expired.lock().contains(&location.file_reference) {
            return Err(FetchError::ReferenceExpired(format!("file {}", location.id)));
        }
        {
            let mut failures = self.download_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(FetchError::Other(anyhow::anyhow!("connection reset")));
            }
        }
        tokio::fs::write(dest, b"data")
            .await
            .map_err(anyhow::Error::from)?;
        self.downloads.lock().push((location.id, dest.to_path_buf()));
        Ok(())
    }
}

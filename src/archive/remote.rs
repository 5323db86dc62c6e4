use crate::error::FetchError;
use crate::model::{
    Chat, ChatInfo, DocumentRef, FileLocation, RemoteAdminEvent, RemoteMessage, StickerSet,
    StickerSetRef, User,
};
use async_trait::async_trait;
use std::path::Path;

/// A sticker set together with the stickers in it.
#[derive(Debug, Clone)]
pub struct FetchedStickerSet {
    pub set: StickerSet,
    pub documents: Vec<DocumentRef>,
}

/// Something that happened in a followed chat.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    NewMessage(RemoteMessage),
    MessageEdited(RemoteMessage),
    /// `chat_id` is `None` for private chats and basic groups, where the
    /// server does not say which chat the ids belong to.
    MessagesDeleted {
        chat_id: Option<i64>,
        message_ids: Vec<i32>,
    },
}

/// The remote API as the archiver uses it.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// API layer stamped on every captured snapshot.
    fn schema_layer(&self) -> i32;

    async fn chat_info(&self, chat_id: i64) -> Result<ChatInfo, FetchError>;

    /// Up to `limit` messages with ids below `offset_id` (or the newest
    /// ones if `offset_id` is 0), newest first.
    async fn history_page(
        &self,
        chat_id: i64,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, FetchError>;

    /// Up to `limit` admin log events with ids below `max_id` (or the
    /// newest if 0), newest first.
    async fn admin_log_page(
        &self,
        chat_id: i64,
        max_id: i64,
        limit: usize,
    ) -> Result<Vec<RemoteAdminEvent>, FetchError>;

    async fn full_user(&self, user_id: i64) -> Result<User, FetchError>;

    async fn full_chat(&self, chat_id: i64) -> Result<Chat, FetchError>;

    async fn full_channel(&self, channel_id: i64) -> Result<Chat, FetchError>;

    async fn sticker_set(&self, set: StickerSetRef) -> Result<FetchedStickerSet, FetchError>;

    /// Write the file at `location` to `dest`.
    async fn download(&self, location: &FileLocation, dest: &Path) -> Result<(), FetchError>;
}

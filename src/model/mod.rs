//! Archived resource types.
//!
//! Every archived entity is an immutable snapshot carrying a [`ResourceMeta`]
//! header. Successive snapshots of the same remote entity share a
//! `resource_id` and are ordered by [`VersionedResource::sort_key`].

pub mod admin_event;
pub mod chat;
pub mod message;
pub mod remote;
pub mod run;
pub mod sticker;
pub mod user;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use admin_event::{AdminAction, AdminEvent, RemoteAdminEvent};
pub use chat::Chat;
pub use message::Message;
pub use remote::{
    ChatInfo, ChatKind, DocumentRef, FileKind, FileLocation, MediaDisposition, MediaFile,
    MediaRef, PeerKey, RemoteMessage, StickerAttr, StickerSetRef,
};
pub use run::{ArchiveRunRecord, RunStats, RunTimer};
pub use sticker::{Sticker, StickerSet};
pub use user::User;

/// Kinds of resources the archive knows how to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Message,
    User,
    Chat,
    Sticker,
    StickerSet,
    AdminEvent,
}

impl ResourceKind {
    /// Every kind, in table creation order.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Message,
        ResourceKind::User,
        ResourceKind::Chat,
        ResourceKind::Sticker,
        ResourceKind::StickerSet,
        ResourceKind::AdminEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Message => "Message",
            ResourceKind::User => "User",
            ResourceKind::Chat => "Chat",
            ResourceKind::Sticker => "Sticker",
            ResourceKind::StickerSet => "StickerSet",
            ResourceKind::AdminEvent => "AdminEvent",
        }
    }

    /// Table holding snapshots of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            ResourceKind::Message => "messages",
            ResourceKind::User => "users",
            ResourceKind::Chat => "chats",
            ResourceKind::Sticker => "stickers",
            ResourceKind::StickerSet => "sticker_sets",
            ResourceKind::AdminEvent => "admin_events",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header shared by every archived snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub archive_datetime: DateTime<Utc>,
    pub schema_layer: i32,
    pub resource_id: i64,
    pub resource_type: ResourceKind,
    /// Textual form of the remote object, kept byte-for-byte.
    pub str_repr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dict_repr: Option<serde_json::Value>,
}

impl ResourceMeta {
    /// Capture a snapshot header at the current time.
    pub fn capture(
        resource_type: ResourceKind,
        resource_id: i64,
        schema_layer: i32,
        str_repr: String,
        dict_repr: Option<serde_json::Value>,
    ) -> Self {
        Self {
            archive_datetime: Utc::now(),
            schema_layer,
            resource_id,
            resource_type,
            str_repr,
            dict_repr,
        }
    }
}

pub trait Resource {
    fn meta(&self) -> &ResourceMeta;

    fn resource_id(&self) -> i64 {
        self.meta().resource_id
    }

    fn kind(&self) -> ResourceKind {
        self.meta().resource_type
    }
}

/// Ordering key for snapshots of one resource id, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub deleted: bool,
    pub edited: bool,
    pub edit_datetime: Option<DateTime<Utc>>,
    pub schema_layer: i32,
    pub archive_datetime: DateTime<Utc>,
}

impl SortKey {
    pub fn from_meta(meta: &ResourceMeta) -> Self {
        Self {
            deleted: false,
            edited: false,
            edit_datetime: None,
            schema_layer: meta.schema_layer,
            archive_datetime: meta.archive_datetime,
        }
    }
}

pub trait VersionedResource: Resource + Clone {
    fn sort_key(&self) -> SortKey {
        SortKey::from_meta(self.meta())
    }

    /// Compares only the fields that matter for archiving, ignoring
    /// incidental changes like refreshed access tokens.
    fn equivalent(&self, other: &Self) -> bool;
}

//! Views of remote objects as the archiver consumes them.
//!
//! These are not archived directly; they are converted into snapshot
//! types (`Message`, `Sticker`, ...) before persisting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PeerKey {
    User(i64),
    Chat(i64),
    Channel(i64),
}

impl PeerKey {
    pub fn id(&self) -> i64 {
        match self {
            PeerKey::User(id) | PeerKey::Chat(id) | PeerKey::Channel(id) => *id,
        }
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerKey::User(id) => write!(f, "user {}", id),
            PeerKey::Chat(id) => write!(f, "chat {}", id),
            PeerKey::Channel(id) => write!(f, "channel {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    BasicGroup,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Private chats and basic groups share one message id space per
    /// account, so deletions arrive without a chat id and there is no
    /// admin log.
    pub fn is_small(&self) -> bool {
        matches!(self, ChatKind::Private | ChatKind::BasicGroup)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub chat_id: i64,
    pub peer: PeerKey,
    pub kind: ChatKind,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    Document,
}

/// Everything needed to download one file. `file_reference` is the
/// expiring token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub kind: FileKind,
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub thumb_size: String,
    pub dc_id: i32,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StickerSetRef {
    pub id: i64,
    pub access_hash: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerAttr {
    pub emoji: String,
    pub set: Option<StickerSetRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub location: FileLocation,
    pub file_name: Option<String>,
    pub mime_type: String,
    pub date: Option<DateTime<Utc>>,
    pub sticker: Option<StickerAttr>,
    pub raw_repr: String,
}

impl DocumentRef {
    pub fn id(&self) -> i64 {
        self.location.id
    }

    pub fn extension(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_string())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "unknown_filetype".to_string())
    }

    pub fn set_id(&self) -> Option<i64> {
        self.sticker.as_ref().and_then(|s| s.set).map(|s| s.id)
    }
}

/// Why a media kind is not downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDisposition {
    /// Nothing to fetch (locations, dice).
    NoAction,
    /// Has content worth archiving later (polls, contacts, web pages).
    NotYetSupported,
    /// Deliberately not archived.
    Ignored,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    Photo {
        location: FileLocation,
    },
    Document {
        document: DocumentRef,
    },
    /// Self-destructing media whose content is already gone.
    Expired {
        kind: String,
    },
    Unsupported {
        kind: String,
        disposition: MediaDisposition,
    },
}

/// A message as returned by the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMessage {
    pub id: i32,
    pub chat_id: i64,
    pub date: DateTime<Utc>,
    pub edit_date: Option<DateTime<Utc>>,
    pub text: String,
    pub sender: Option<PeerKey>,
    pub media: Option<MediaRef>,
    pub raw_repr: String,
}

/// A file to fetch for a message, with its on-disk naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub media_id: i64,
    pub extension: String,
    pub location: FileLocation,
}

impl RemoteMessage {
    pub fn media_id(&self) -> Option<i64> {
        match self.media.as_ref()? {
            MediaRef::Photo { location } => Some(location.id),
            MediaRef::Document { document } => Some(document.id()),
            MediaRef::Expired { .. } | MediaRef::Unsupported { .. } => None,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self.sender {
            Some(PeerKey::User(id)) => Some(id),
            _ => None,
        }
    }

    /// The sticker document, if this message is a sticker.
    pub fn sticker(&self) -> Option<&DocumentRef> {
        match self.media.as_ref()? {
            MediaRef::Document { document } if document.sticker.is_some() => Some(document),
            _ => None,
        }
    }

    /// The downloadable file carried by this message, if any.
    pub fn media_file(&self) -> Option<MediaFile> {
        match self.media.as_ref()? {
            MediaRef::Photo { location } => Some(MediaFile {
                media_id: location.id,
                extension: "jpg".to_string(),
                location: location.clone(),
            }),
            MediaRef::Document { document } => Some(MediaFile {
                media_id: document.id(),
                extension: document.extension(),
                location: document.location.clone(),
            }),
            MediaRef::Expired { .. } | MediaRef::Unsupported { .. } => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    pub fn location(kind: FileKind, id: i64, reference: &[u8]) -> FileLocation {
        FileLocation {
            kind,
            id,
            access_hash: id * 7,
            file_reference: reference.to_vec(),
            thumb_size: String::new(),
            dc_id: 2,
            size: Some(1024),
        }
    }

    pub fn text_message(chat_id: i64, id: i32, date: DateTime<Utc>) -> RemoteMessage {
        RemoteMessage {
            id,
            chat_id,
            date,
            edit_date: None,
            text: format!("message {}", id),
            sender: Some(PeerKey::User(1000 + id as i64)),
            media: None,
            raw_repr: format!("Message {{ id: {} }}", id),
        }
    }

    pub fn photo_message(chat_id: i64, id: i32, photo_id: i64, reference: &[u8]) -> RemoteMessage {
        let mut msg = text_message(chat_id, id, at(2024, 1, 1));
        msg.media = Some(MediaRef::Photo {
            location: location(FileKind::Photo, photo_id, reference),
        });
        msg.raw_repr = format!("Message {{ id: {}, file_reference: {:?} }}", id, reference);
        msg
    }

    pub fn sticker_document(sticker_id: i64, set: Option<i64>, reference: &[u8]) -> DocumentRef {
        DocumentRef {
            location: location(FileKind::Document, sticker_id, reference),
            file_name: Some("sticker.webp".to_string()),
            mime_type: "image/webp".to_string(),
            date: Some(at(2023, 6, 1)),
            sticker: Some(StickerAttr {
                emoji: "🙂".to_string(),
                set: set.map(|id| StickerSetRef {
                    id,
                    access_hash: id * 3,
                }),
            }),
            raw_repr: format!("Document {{ id: {} }}", sticker_id),
        }
    }

    pub fn sticker_message(
        chat_id: i64,
        id: i32,
        sticker_id: i64,
        set: Option<i64>,
        reference: &[u8],
    ) -> RemoteMessage {
        let mut msg = text_message(chat_id, id, at(2024, 1, 1));
        msg.media = Some(MediaRef::Document {
            document: sticker_document(sticker_id, set, reference),
        });
        msg.raw_repr = format!("Message {{ id: {}, file_reference: {:?} }}", id, reference);
        msg
    }
}

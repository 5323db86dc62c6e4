use super::{DocumentRef, Resource, ResourceKind, ResourceMeta, VersionedResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub sticker_set_id: Option<i64>,
    pub emoji: Option<String>,
    pub file_name: String,
    pub sticker_upload_date: Option<DateTime<Utc>>,
}

impl Sticker {
    pub fn from_document(doc: &DocumentRef, file_name: String, schema_layer: i32) -> Self {
        Self {
            meta: ResourceMeta::capture(
                ResourceKind::Sticker,
                doc.id(),
                schema_layer,
                doc.raw_repr.clone(),
                None,
            ),
            sticker_set_id: doc.set_id(),
            emoji: doc.sticker.as_ref().map(|s| s.emoji.clone()),
            file_name,
            sticker_upload_date: doc.date,
        }
    }
}

impl Resource for Sticker {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl VersionedResource for Sticker {
    fn equivalent(&self, other: &Self) -> bool {
        self.sticker_set_id == other.sticker_set_id
            && self.emoji == other.emoji
            && self.file_name == other.file_name
            && self.sticker_upload_date == other.sticker_upload_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickerSet {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub handle: String,
    pub title: String,
    pub sticker_count: i32,
}

impl Resource for StickerSet {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl VersionedResource for StickerSet {
    fn equivalent(&self, other: &Self) -> bool {
        self.handle == other.handle
            && self.title == other.title
            && self.sticker_count == other.sticker_count
    }
}

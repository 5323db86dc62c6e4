use super::{RemoteMessage, Resource, ResourceKind, ResourceMeta, SortKey, VersionedResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub chat_id: i64,
    pub datetime: DateTime<Utc>,
    pub text: String,
    pub media_id: Option<i64>,
    pub user_id: Option<i64>,
    pub sticker_id: Option<i64>,
    pub deleted: bool,
    pub edit_datetime: Option<DateTime<Utc>>,
}

impl Message {
    pub fn from_remote(msg: &RemoteMessage, schema_layer: i32, deleted: bool) -> Self {
        let dict = serde_json::json!({
            "id": msg.id,
            "chat_id": msg.chat_id,
            "date": msg.date,
            "edit_date": msg.edit_date,
            "text": msg.text,
            "sender": msg.sender,
        });
        Self {
            meta: ResourceMeta::capture(
                ResourceKind::Message,
                msg.id as i64,
                schema_layer,
                msg.raw_repr.clone(),
                Some(dict),
            ),
            chat_id: msg.chat_id,
            datetime: msg.date,
            text: msg.text.clone(),
            media_id: msg.media_id(),
            user_id: msg.user_id(),
            sticker_id: msg.sticker().map(|doc| doc.id()),
            deleted,
            edit_datetime: msg.edit_date,
        }
    }

    pub fn id(&self) -> i32 {
        self.meta.resource_id as i32
    }

    /// A fresh snapshot recording that this message is gone.
    pub fn mark_deleted(&self) -> Self {
        let mut copy = self.clone();
        copy.meta.archive_datetime = Utc::now();
        copy.deleted = true;
        copy
    }
}

impl Resource for Message {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

impl VersionedResource for Message {
    fn sort_key(&self) -> SortKey {
        SortKey {
            deleted: self.deleted,
            edited: self.edit_datetime.is_some(),
            edit_datetime: self.edit_datetime,
            schema_layer: self.meta.schema_layer,
            archive_datetime: self.meta.archive_datetime,
        }
    }

    fn equivalent(&self, other: &Self) -> bool {
        self.datetime == other.datetime
            && self.text == other.text
            && self.media_id == other.media_id
            && self.user_id == other.user_id
            && self.deleted == other.deleted
            && self.edit_datetime == other.edit_datetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::remote::fixtures::{at, photo_message, text_message};
    use chrono::Duration;

    #[test]
    fn refreshed_reference_is_equivalent() {
        let a = Message::from_remote(&photo_message(1, 5, 77, b"old"), 201, false);
        let b = Message::from_remote(&photo_message(1, 5, 77, b"new"), 201, false);
        assert_ne!(a.meta.str_repr, b.meta.str_repr);
        assert!(a.equivalent(&b));
    }

    #[test]
    fn edits_and_deletions_are_not_equivalent() {
        let base = Message::from_remote(&text_message(1, 5, at(2024, 1, 1)), 201, false);
        let mut edited = base.clone();
        edited.edit_datetime = Some(at(2024, 1, 2));
        edited.text = "changed".to_string();
        assert!(!base.equivalent(&edited));
        assert!(!base.equivalent(&base.mark_deleted()));
    }

    #[test]
    fn deleted_copy_sorts_after_newer_capture() {
        let base = Message::from_remote(&text_message(1, 5, at(2024, 1, 1)), 201, false);
        let deleted = base.mark_deleted();
        let mut later = base.clone();
        later.meta.archive_datetime = deleted.meta.archive_datetime + Duration::days(1);
        assert!(later.sort_key() < deleted.sort_key());
    }
}

use super::{Resource, ResourceMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a basic group or channel. Not versioned: every fetch is
/// stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub title: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub is_creator: bool,
    pub have_left: bool,
    pub broadcast_channel: bool,
    pub participants_count: Option<i32>,
    pub about: Option<String>,
    pub username: Option<String>,
    pub migrated_to_chat_id: Option<i64>,
    pub migrated_from_chat_id: Option<i64>,
    pub linked_chat_id: Option<i64>,
}

impl Resource for Chat {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

use super::{RemoteMessage, Resource, ResourceKind, ResourceMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminEvent {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub datetime: DateTime<Utc>,
    pub user_id: i64,
    pub action: String,
    pub message_id: Option<i32>,
}

impl AdminEvent {
    pub fn from_remote(event: &RemoteAdminEvent, schema_layer: i32) -> Self {
        Self {
            meta: ResourceMeta::capture(
                ResourceKind::AdminEvent,
                event.id,
                schema_layer,
                event.raw_repr.clone(),
                None,
            ),
            datetime: event.date,
            user_id: event.user_id,
            action: event.action.label().to_string(),
            message_id: event.action.message_id(),
        }
    }
}

impl Resource for AdminEvent {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
}

/// What an admin log entry did, as far as message history is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminAction {
    DeleteMessage(RemoteMessage),
    EditMessage {
        previous: RemoteMessage,
        current: RemoteMessage,
    },
    Other(String),
}

impl AdminAction {
    pub fn label(&self) -> &str {
        match self {
            AdminAction::DeleteMessage(_) => "DeleteMessage",
            AdminAction::EditMessage { .. } => "EditMessage",
            AdminAction::Other(kind) => kind,
        }
    }

    pub fn message_id(&self) -> Option<i32> {
        match self {
            AdminAction::DeleteMessage(msg) => Some(msg.id),
            AdminAction::EditMessage { current, .. } => Some(current.id),
            AdminAction::Other(_) => None,
        }
    }
}

/// An admin log entry as returned by the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAdminEvent {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub user_id: i64,
    pub action: AdminAction,
    pub raw_repr: String,
}

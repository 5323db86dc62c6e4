use super::ChatKind;
use crate::config::BehaviourConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Start, latest activity and end of one phase of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTimer {
    pub start: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RunTimer {
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.start = Some(now);
        self.latest = Some(now);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.latest = Some(now);
    }

    pub fn end(&mut self, now: DateTime<Utc>) {
        self.latest = Some(now);
        self.end = Some(now);
    }

    pub fn is_running(&self) -> bool {
        self.start.is_some() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub messages_seen: u64,
    pub messages_saved: u64,
    pub media_seen: u64,
    pub admin_events_seen: u64,
}

/// Progress of one archive run for one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRunRecord {
    pub run_id: String,
    pub target_id: i64,
    pub target_kind: Option<ChatKind>,
    pub time_queued: DateTime<Utc>,
    pub history: RunTimer,
    pub follow: RunTimer,
    pub behaviour: BehaviourConfig,
    pub completed: bool,
    pub failure_reason: Option<String>,
    pub stats: RunStats,
}

impl ArchiveRunRecord {
    pub fn new(run_id: String, target_id: i64, behaviour: BehaviourConfig) -> Self {
        Self {
            run_id,
            target_id,
            target_kind: None,
            time_queued: Utc::now(),
            history: RunTimer::default(),
            follow: RunTimer::default(),
            behaviour,
            completed: false,
            failure_reason: None,
            stats: RunStats::default(),
        }
    }

    pub fn status(&self) -> &'static str {
        if self.completed {
            "complete"
        } else if self.failure_reason.is_some() {
            "failed"
        } else if self.follow.is_running() {
            "following"
        } else if self.history.is_running() {
            "archiving"
        } else {
            "queued"
        }
    }
}

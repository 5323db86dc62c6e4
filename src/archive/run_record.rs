//! Progress tracking for one archive run, persisted with throttling.

use crate::model::{ArchiveRunRecord, ChatKind, RunTimer};
use crate::store::ArchiveStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    MessagesSeen,
    MessagesSaved,
    MediaSeen,
    AdminEventsSeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    History,
    Follow,
}

pub struct RunRecorder {
    record: Mutex<ArchiveRunRecord>,
    store: Arc<dyn ArchiveStore>,
    interval: Duration,
    last_saved: Mutex<Option<Instant>>,
}

impl RunRecorder {
    pub fn new(record: ArchiveRunRecord, store: Arc<dyn ArchiveStore>, interval: Duration) -> Self {
        Self {
            record: Mutex::new(record),
            store,
            interval,
            last_saved: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> String {
        self.record.lock().run_id.clone()
    }

    pub fn snapshot(&self) -> ArchiveRunRecord {
        self.record.lock().clone()
    }

    /// Persist the record. Unforced saves happen at most once per interval.
    pub async fn save(&self, force: bool) -> Result<()> {
        if !force {
            if let Some(at) = *self.last_saved.lock() {
                if at.elapsed() < self.interval {
                    return Ok(());
                }
            }
        }
        let snapshot = self.snapshot();
        self.store.save_archive_run(&snapshot).await?;
        *self.last_saved.lock() = Some(Instant::now());
        Ok(())
    }

    pub async fn queued(&self) -> Result<()> {
        self.save(true).await
    }

    pub fn set_target_kind(&self, kind: ChatKind) {
        self.record.lock().target_kind = Some(kind);
    }

    pub async fn start(&self, phase: Phase) -> Result<()> {
        self.with_timer(phase, |t, now| t.start(now));
        self.save(true).await
    }

    pub async fn touch(&self, phase: Phase) -> Result<()> {
        self.with_timer(phase, |t, now| t.touch(now));
        self.save(false).await
    }

    pub async fn end(&self, phase: Phase) -> Result<()> {
        self.with_timer(phase, |t, now| t.end(now));
        self.save(true).await
    }

    pub async fn add(&self, counter: Counter, n: u64) -> Result<()> {
        {
            let mut record = self.record.lock();
            let stats = &mut record.stats;
            match counter {
                Counter::MessagesSeen => stats.messages_seen += n,
                Counter::MessagesSaved => stats.messages_saved += n,
                Counter::MediaSeen => stats.media_seen += n,
                Counter::AdminEventsSeen => stats.admin_events_seen += n,
            }
        }
        self.save(false).await
    }

    pub async fn complete(&self) -> Result<()> {
        self.record.lock().completed = true;
        self.save(true).await
    }

    pub async fn fail(&self, reason: &str) -> Result<()> {
        {
            let mut guard = self.record.lock();
            let record = &mut *guard;
            let now = Utc::now();
            for timer in [&mut record.history, &mut record.follow] {
                if timer.is_running() {
                    timer.end(now);
                }
            }
            record.failure_reason = Some(reason.to_string());
        }
        self.save(true).await
    }

    fn with_timer(&self, phase: Phase, f: impl FnOnce(&mut RunTimer, DateTime<Utc>)) {
        let mut record = self.record.lock();
        let timer = match phase {
            Phase::History => &mut record.history,
            Phase::Follow => &mut record.follow,
        };
        f(timer, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviourConfig;
    use crate::store::memory::MemoryStore;

    fn recorder(store: Arc<MemoryStore>) -> RunRecorder {
        RunRecorder::new(
            ArchiveRunRecord::new("run-1".into(), -100, BehaviourConfig::default()),
            store,
            Duration::from_secs(180),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn progress_saves_are_throttled() {
        let store = MemoryStore::new();
        let rec = recorder(Arc::clone(&store));
        rec.queued().await.expect("save");
        rec.start(Phase::History).await.expect("save");
        assert_eq!(store.run_writes(), 2);

        for _ in 0..50 {
            rec.add(Counter::MessagesSeen, 1).await.expect("save");
        }
        assert_eq!(store.run_writes(), 2);

        tokio::time::advance(Duration::from_secs(181)).await;
        rec.add(Counter::MessagesSaved, 1).await.expect("save");
        assert_eq!(store.run_writes(), 3);

        rec.end(Phase::History).await.expect("save");
        rec.complete().await.expect("save");
        assert_eq!(store.run_writes(), 5);

        let stored = store.runs();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].stats.messages_seen, 50);
        assert!(stored[0].completed);
        assert_eq!(stored[0].status(), "complete");
    }

    #[tokio::test]
    async fn failure_closes_open_timers() {
        let store = MemoryStore::new();
        let rec = recorder(Arc::clone(&store));
        rec.start(Phase::History).await.expect("save");
        rec.fail("chat is private").await.expect("save");

        let runs = store.runs();
        let stored = &runs[0];
        assert_eq!(stored.failure_reason.as_deref(), Some("chat is private"));
        assert!(stored.history.end.is_some());
        assert!(stored.follow.start.is_none());
        assert_eq!(stored.status(), "failed");
    }
}

//! How far back an incremental history scan has to go.

use crate::store::ArchiveStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

/// Messages newer than this, relative to when the run was queued, may be
/// racing with live updates and are not trusted as a boundary.
pub const LIVE_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct CutoffPolicy {
    high_water_mark: Option<DateTime<Utc>>,
    started_empty: bool,
    overlap: Option<Duration>,
}

impl CutoffPolicy {
    /// `oldest_known` is the oldest message already archived, or `None`
    /// if the chat has nothing stored. An overlap of 0 days disables the
    /// cutoff.
    pub fn new(oldest_known: Option<DateTime<Utc>>, overlap_days: u32) -> Self {
        Self {
            high_water_mark: oldest_known,
            started_empty: oldest_known.is_none(),
            overlap: (overlap_days > 0).then(|| Duration::days(overlap_days as i64)),
        }
    }

    pub async fn load(
        store: &dyn ArchiveStore,
        time_queued: DateTime<Utc>,
        overlap_days: u32,
    ) -> Result<Self> {
        let before = time_queued - Duration::minutes(LIVE_MARGIN_MINUTES);
        let oldest = store.oldest_message_before(before).await?;
        Ok(Self::new(oldest.map(|m| m.datetime), overlap_days))
    }

    pub fn high_water_mark(&self) -> Option<DateTime<Utc>> {
        self.high_water_mark
    }

    /// Move the high-water mark earlier if `seen` is older. Never moves it later.
    pub fn bump(&mut self, seen: DateTime<Utc>) {
        match self.high_water_mark {
            Some(current) if current <= seen => {}
            _ => self.high_water_mark = Some(seen),
        }
    }

    pub fn cutoff_date(&self) -> Option<DateTime<Utc>> {
        if self.started_empty {
            return None;
        }
        Some(self.high_water_mark? - self.overlap?)
    }

    pub fn cutoff_met(&self, date: DateTime<Utc>) -> bool {
        self.cutoff_date().is_some_and(|cutoff| date < cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::remote::fixtures::text_message;
    use crate::model::Message;
    use crate::store::memory::MemoryStore;
    use crate::store::VersionedRepo;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    #[test]
    fn stops_before_overlap_window() {
        let policy = CutoffPolicy::new(Some(day(10)), 5);
        assert_eq!(policy.cutoff_date(), Some(day(5)));
        assert!(!policy.cutoff_met(day(6)));
        assert!(!policy.cutoff_met(day(5)));
        assert!(policy.cutoff_met(day(5) - Duration::seconds(1)));
    }

    #[test]
    fn empty_chat_scans_everything() {
        let mut policy = CutoffPolicy::new(None, 5);
        assert_eq!(policy.cutoff_date(), None);
        policy.bump(day(3));
        assert!(!policy.cutoff_met(day(1) - Duration::days(3650)));
    }

    #[test]
    fn zero_overlap_scans_everything() {
        let policy = CutoffPolicy::new(Some(day(10)), 0);
        assert!(!policy.cutoff_met(day(1)));
    }

    #[test]
    fn bump_only_moves_earlier() {
        let mut policy = CutoffPolicy::new(Some(day(10)), 5);
        policy.bump(day(20));
        assert_eq!(policy.high_water_mark(), Some(day(10)));
        policy.bump(day(8));
        assert_eq!(policy.cutoff_date(), Some(day(3)));
    }

    #[tokio::test]
    async fn load_ignores_messages_racing_the_run() {
        let store = MemoryStore::new();
        let old = Message::from_remote(&text_message(1, 1, day(10)), 201, false);
        let fresh = Message::from_remote(&text_message(1, 2, day(20)), 201, false);
        VersionedRepo::<Message>::save(&*store, &old).await.expect("save");
        VersionedRepo::<Message>::save(&*store, &fresh).await.expect("save");

        let policy = CutoffPolicy::load(&*store, day(20) + Duration::minutes(1), 5)
            .await
            .expect("load");
        assert_eq!(policy.high_water_mark(), Some(day(10)));

        let only_fresh = MemoryStore::new();
        VersionedRepo::<Message>::save(&*only_fresh, &fresh).await.expect("save");
        let policy = CutoffPolicy::load(&*only_fresh, day(20) + Duration::minutes(1), 5)
            .await
            .expect("load");
        assert_eq!(policy.cutoff_date(), None);
    }
}

//! Deciding whether a new snapshot is worth storing, and collapsing
//! redundant stored snapshots.

use crate::error::ArchiveError;
use crate::model::VersionedResource;
use crate::store::{StoredResource, VersionedRepo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Unchanged,
}

fn check_same_id<R: VersionedResource>(copies: &[R]) -> Result<(), ArchiveError> {
    let Some(first) = copies.first() else {
        return Ok(());
    };
    let id = first.resource_id();
    if let Some(other) = copies.iter().find(|c| c.resource_id() != id) {
        return Err(ArchiveError::invariant(format!(
            "{} copies of {} mixed with {}",
            first.kind(),
            id,
            other.resource_id()
        )));
    }
    Ok(())
}

/// Sort oldest first and drop every copy equivalent to the one kept
/// before it, so each kept copy marks a change.
pub fn remove_redundant_copies<R: VersionedResource>(mut copies: Vec<R>) -> Vec<R> {
    copies.sort_by_key(|c| c.sort_key());
    let mut kept: Vec<R> = Vec::with_capacity(copies.len());
    for copy in copies {
        if kept.last().map_or(true, |last| !last.equivalent(&copy)) {
            kept.push(copy);
        }
    }
    kept
}

/// The newest of a set of copies of one resource.
pub fn latest_copy<R: VersionedResource>(copies: &[R]) -> Result<Option<&R>, ArchiveError> {
    check_same_id(copies)?;
    Ok(copies.iter().max_by_key(|c| c.sort_key()))
}

/// Collapse redundant stored copies, rewriting the store if anything went.
pub async fn cleanup_copies<R, S>(repo: &S, copies: Vec<R>) -> Result<Vec<R>, ArchiveError>
where
    R: VersionedResource + StoredResource,
    S: VersionedRepo<R> + ?Sized,
{
    if copies.len() < 2 {
        return Ok(copies);
    }
    check_same_id(&copies)?;
    let before = copies.len();
    let id = copies[0].resource_id();
    let kind = copies[0].kind();
    let kept = remove_redundant_copies(copies);
    if kept.len() < before {
        log::info!(
            "Removing {} redundant copies of {} {}",
            before - kept.len(),
            kind,
            id
        );
        repo.replace_all(id, &kept).await?;
    }
    Ok(kept)
}

/// Latest stored copy of `resource_id`, after optional cleanup.
pub async fn load_latest<R, S>(
    repo: &S,
    resource_id: i64,
    cleanup: bool,
) -> Result<Option<R>, ArchiveError>
where
    R: VersionedResource + StoredResource,
    S: VersionedRepo<R> + ?Sized,
{
    let mut copies = repo.list_all(resource_id).await?;
    if cleanup {
        copies = cleanup_copies(repo, copies).await?;
    }
    Ok(latest_copy(&copies)?.cloned())
}

/// Store `resource` unless the latest stored copy is equivalent.
pub async fn save_if_not_duplicate<R, S>(
    repo: &S,
    resource: &R,
    cleanup: bool,
) -> Result<SaveOutcome, ArchiveError>
where
    R: VersionedResource + StoredResource,
    S: VersionedRepo<R> + ?Sized,
{
    let latest = load_latest(repo, resource.resource_id(), cleanup).await?;
    if latest.is_some_and(|l| l.equivalent(resource)) {
        return Ok(SaveOutcome::Unchanged);
    }
    repo.save(resource).await?;
    Ok(SaveOutcome::Saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::remote::fixtures::{at, text_message};
    use crate::model::{Message, ResourceKind};
    use crate::store::memory::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn captured(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn base() -> Message {
        Message::from_remote(&text_message(9, 42, at(2024, 1, 1)), 201, false)
    }

    /// A: live, unedited, t=1. B: deleted, t=2. C: edited at t=1.5, t=3.
    fn abc() -> (Message, Message, Message) {
        let mut a = base();
        a.meta.archive_datetime = captured(1);
        let mut b = base();
        b.deleted = true;
        b.meta.archive_datetime = captured(2);
        let mut c = base();
        c.edit_datetime = Some(captured(1) + Duration::milliseconds(500));
        c.text = "edited".to_string();
        c.meta.archive_datetime = captured(3);
        (a, b, c)
    }

    #[test]
    fn sort_order_is_live_then_edited_then_deleted() {
        let (a, b, c) = abc();
        let orders = [
            vec![a.clone(), b.clone(), c.clone()],
            vec![b.clone(), c.clone(), a.clone()],
            vec![c.clone(), b.clone(), a.clone()],
            vec![b.clone(), a.clone(), c.clone()],
        ];
        for order in orders {
            let sorted = remove_redundant_copies(order);
            let texts: Vec<_> = sorted.iter().map(|m| (m.deleted, m.text.clone())).collect();
            assert_eq!(
                texts,
                vec![
                    (false, a.text.clone()),
                    (false, c.text.clone()),
                    (true, b.text.clone())
                ]
            );
        }
    }

    #[test]
    fn latest_copy_is_the_deleted_one() {
        let (a, b, c) = abc();
        let copies = vec![b.clone(), a, c];
        assert_eq!(latest_copy(&copies).expect("same id"), Some(&b));
    }

    #[test]
    fn mixed_ids_are_an_invariant_violation() {
        let one = base();
        let other = Message::from_remote(&text_message(9, 43, at(2024, 1, 1)), 201, false);
        let err = latest_copy(&[one, other]).expect_err("mixed ids");
        assert!(matches!(err, ArchiveError::Invariant(_)));
    }

    #[tokio::test]
    async fn cleanup_leaves_no_consecutive_equivalents() {
        let store = MemoryStore::new();
        // Interleave two states, several captures each, in shuffled order.
        let mut copies = Vec::new();
        for i in 0..8 {
            let mut m = base();
            m.meta.archive_datetime = captured(i);
            if i >= 4 {
                m.edit_datetime = Some(captured(100));
                m.text = "edited".to_string();
            }
            copies.push(m);
        }
        for i in [5, 0, 7, 2, 6, 1, 4, 3] {
            VersionedRepo::<Message>::save(&*store, &copies[i]).await.expect("save");
        }

        let stored: Vec<Message> = VersionedRepo::<Message>::list_all(&*store, 42)
            .await
            .expect("list");
        let kept = cleanup_copies(&*store, stored).await.expect("cleanup");
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].meta.archive_datetime, captured(0));
        assert_eq!(kept[1].meta.archive_datetime, captured(4));

        let mut after: Vec<Message> = VersionedRepo::<Message>::list_all(&*store, 42)
            .await
            .expect("list");
        after.sort_by_key(|m| m.sort_key());
        assert_eq!(after.len(), 2);
        for pair in after.windows(2) {
            assert!(!pair[0].equivalent(&pair[1]));
        }
    }

    #[tokio::test]
    async fn equivalent_snapshot_is_not_saved_twice() {
        let store = MemoryStore::new();
        let first = base();
        let mut refetched = base();
        refetched.meta.str_repr = "Message { id: 42, file_reference: [1] }".to_string();

        let outcome = save_if_not_duplicate(&*store, &first, false).await.expect("save");
        assert_eq!(outcome, SaveOutcome::Saved);
        let outcome = save_if_not_duplicate(&*store, &refetched, false).await.expect("save");
        assert_eq!(outcome, SaveOutcome::Unchanged);

        let outcome = save_if_not_duplicate(&*store, &first.mark_deleted(), false)
            .await
            .expect("save");
        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(store.writes(ResourceKind::Message), 2);
    }
}

//! In-memory store used by tests. Rows go through serde like the turso
//! store does, and every write is counted.

use super::{ArchiveStore, StoreProvider, StoredResource, VersionedRepo};
use crate::model::{
    AdminEvent, ArchiveRunRecord, Chat, Message, ResourceKind, VersionedResource,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<ResourceKind, Vec<(u64, serde_json::Value)>>>,
    runs: Mutex<Vec<ArchiveRunRecord>>,
    next_row: Mutex<u64>,
    writes: Mutex<HashMap<ResourceKind, usize>>,
    run_writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push<R: StoredResource>(&self, resource: &R) -> Result<()> {
        let value = serde_json::to_value(resource)?;
        let row = {
            let mut next = self.next_row.lock();
            *next += 1;
            *next
        };
        self.rows.lock().entry(R::KIND).or_default().push((row, value));
        *self.writes.lock().entry(R::KIND).or_default() += 1;
        Ok(())
    }

    /// Every stored row of one kind, in insertion order.
    pub fn all<R: StoredResource>(&self) -> Vec<R> {
        self.rows
            .lock()
            .get(&R::KIND)
            .map(|rows| {
                rows.iter()
                    .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of writes of one kind, including ones later replaced.
    pub fn writes(&self, kind: ResourceKind) -> usize {
        self.writes.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn run_writes(&self) -> usize {
        *self.run_writes.lock()
    }

    pub fn runs(&self) -> Vec<ArchiveRunRecord> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl<R> VersionedRepo<R> for MemoryStore
where
    R: VersionedResource + StoredResource,
{
    async fn save(&self, resource: &R) -> Result<()> {
        self.push(resource)
    }

    async fn list_all(&self, resource_id: i64) -> Result<Vec<R>> {
        Ok(self
            .all::<R>()
            .into_iter()
            .filter(|r| r.resource_id() == resource_id)
            .collect())
    }

    async fn delete_all(&self, resource_id: i64) -> Result<()> {
        let mut rows = self.rows.lock();
        if let Some(rows) = rows.get_mut(&R::KIND) {
            rows.retain(|(_, v)| v.get("resource_id").and_then(|id| id.as_i64()) != Some(resource_id));
        }
        Ok(())
    }

    async fn replace_all(&self, resource_id: i64, keep: &[R]) -> Result<()> {
        if keep.is_empty() {
            return <Self as VersionedRepo<R>>::delete_all(self, resource_id).await;
        }
        let last_old = *self.next_row.lock();
        for resource in keep {
            self.push(resource)?;
        }
        let mut rows = self.rows.lock();
        if let Some(rows) = rows.get_mut(&R::KIND) {
            rows.retain(|(row, v)| {
                *row > last_old
                    || v.get("resource_id").and_then(|id| id.as_i64()) != Some(resource_id)
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for MemoryStore {
    async fn save_chat(&self, chat: &Chat) -> Result<()> {
        self.push(chat)
    }

    async fn save_admin_event(&self, event: &AdminEvent) -> Result<()> {
        self.push(event)
    }

    async fn save_archive_run(&self, run: &ArchiveRunRecord) -> Result<()> {
        let mut runs = self.runs.lock();
        match runs.iter_mut().find(|r| r.run_id == run.run_id) {
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
        *self.run_writes.lock() += 1;
        Ok(())
    }

    async fn list_archive_runs(&self) -> Result<Vec<ArchiveRunRecord>> {
        let mut runs = self.runs();
        runs.sort_by(|a, b| b.time_queued.cmp(&a.time_queued));
        Ok(runs)
    }

    async fn list_message_ids(&self) -> Result<BTreeSet<i32>> {
        Ok(self.all::<Message>().iter().map(|m| m.id()).collect())
    }

    async fn oldest_message_before(&self, before: DateTime<Utc>) -> Result<Option<Message>> {
        Ok(self
            .all::<Message>()
            .into_iter()
            .filter(|m| m.datetime < before)
            .min_by_key(|m| m.datetime))
    }

    async fn delete_deleted_messages(&self, message_id: i32) -> Result<()> {
        let mut rows = self.rows.lock();
        if let Some(rows) = rows.get_mut(&ResourceKind::Message) {
            rows.retain(|(_, v)| {
                let same_id =
                    v.get("resource_id").and_then(|id| id.as_i64()) == Some(message_id as i64);
                let deleted = v.get("deleted").and_then(|d| d.as_bool()).unwrap_or(false);
                !(same_id && deleted)
            });
        }
        Ok(())
    }
}

/// Hands out one memory store per chat, creating them on first use.
#[derive(Default)]
pub struct MemoryStores {
    chats: Mutex<HashMap<i64, Arc<MemoryStore>>>,
}

impl MemoryStores {
    pub fn get(&self, chat_id: i64) -> Arc<MemoryStore> {
        self.chats
            .lock()
            .entry(chat_id)
            .or_insert_with(MemoryStore::new)
            .clone()
    }
}

#[async_trait]
impl StoreProvider for MemoryStores {
    async fn chat_store(&self, chat_id: i64) -> Result<Arc<dyn ArchiveStore>> {
        Ok(self.get(chat_id))
    }
}

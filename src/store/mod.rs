#[cfg(test)]
pub mod memory;

use crate::model::{
    AdminEvent, ArchiveRunRecord, Chat, Message, Resource, ResourceKind, Sticker, StickerSet,
    User, VersionedResource,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use turso::{Builder, Connection, Database, Row};

/// A resource that can be written to a kind table.
pub trait StoredResource: Resource + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn msg_datetime(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn is_deleted(&self) -> bool {
        false
    }
}

impl StoredResource for Message {
    const KIND: ResourceKind = ResourceKind::Message;

    fn msg_datetime(&self) -> Option<DateTime<Utc>> {
        Some(self.datetime)
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl StoredResource for User {
    const KIND: ResourceKind = ResourceKind::User;
}

impl StoredResource for Chat {
    const KIND: ResourceKind = ResourceKind::Chat;
}

impl StoredResource for Sticker {
    const KIND: ResourceKind = ResourceKind::Sticker;
}

impl StoredResource for StickerSet {
    const KIND: ResourceKind = ResourceKind::StickerSet;
}

impl StoredResource for AdminEvent {
    const KIND: ResourceKind = ResourceKind::AdminEvent;

    fn msg_datetime(&self) -> Option<DateTime<Utc>> {
        Some(self.datetime)
    }
}

/// Snapshot storage for one versioned kind.
#[async_trait]
pub trait VersionedRepo<R: VersionedResource + StoredResource>: Send + Sync {
    async fn save(&self, resource: &R) -> Result<()>;

    async fn list_all(&self, resource_id: i64) -> Result<Vec<R>>;

    async fn delete_all(&self, resource_id: i64) -> Result<()>;

    /// Replace every stored copy of `resource_id` with `keep`. The new rows
    /// are written before the old ones are removed, so an interruption
    /// leaves duplicates rather than nothing.
    async fn replace_all(&self, resource_id: i64, keep: &[R]) -> Result<()>;
}

/// Everything the archiver needs from one database (account-wide or per chat).
#[async_trait]
pub trait ArchiveStore:
    VersionedRepo<Message>
    + VersionedRepo<User>
    + VersionedRepo<Sticker>
    + VersionedRepo<StickerSet>
    + Send
    + Sync
{
    async fn save_chat(&self, chat: &Chat) -> Result<()>;

    async fn save_admin_event(&self, event: &AdminEvent) -> Result<()>;

    /// Insert or update a run record, keyed by run id.
    async fn save_archive_run(&self, run: &ArchiveRunRecord) -> Result<()>;

    /// Run records, newest first.
    async fn list_archive_runs(&self) -> Result<Vec<ArchiveRunRecord>>;

    async fn list_message_ids(&self) -> Result<BTreeSet<i32>>;

    /// The oldest stored message sent before `before`.
    async fn oldest_message_before(&self, before: DateTime<Utc>) -> Result<Option<Message>>;

    /// Drop copies of a message that record it as deleted.
    async fn delete_deleted_messages(&self, message_id: i32) -> Result<()>;
}

/// Opens the per-chat stores.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn chat_store(&self, chat_id: i64) -> Result<Arc<dyn ArchiveStore>>;
}

/// Where things live under the store directory.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn core_db(&self) -> PathBuf {
        self.root.join("core.db")
    }

    pub fn session_path(&self) -> PathBuf {
        self.root.join("session.db")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.root.join("tgarchive.sock")
    }

    fn chats_root(&self) -> PathBuf {
        self.root.join("chats")
    }

    pub fn chat_dir(&self, chat_id: i64) -> PathBuf {
        self.chats_root().join(chat_id.to_string())
    }

    /// Chats that have a database in the store, in id order.
    pub fn archived_chats(&self) -> Vec<i64> {
        let Ok(entries) = std::fs::read_dir(self.chats_root()) else {
            return Vec::new();
        };
        let mut ids: Vec<i64> = entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .filter(|id| self.chat_db(*id).exists())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn chat_db(&self, chat_id: i64) -> PathBuf {
        self.chat_dir(chat_id).join("chat.db")
    }

    pub fn media_path(&self, chat_id: i64, media_id: i64, ext: &str) -> PathBuf {
        self.chat_dir(chat_id)
            .join("media")
            .join(format!("{}.{}", media_id, ext))
    }

    pub fn sticker_path(&self, set_id: Option<i64>, sticker_id: i64, ext: &str) -> PathBuf {
        let set = set_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        self.root
            .join("stickers")
            .join(set)
            .join(format!("{}.{}", sticker_id, ext))
    }
}

pub struct TursoStores {
    layout: StoreLayout,
}

impl TursoStores {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl StoreProvider for TursoStores {
    async fn chat_store(&self, chat_id: i64) -> Result<Arc<dyn ArchiveStore>> {
        let store = Store::open(&self.layout.chat_db(chat_id))
            .await
            .with_context(|| format!("Failed to open store for chat {}", chat_id))?;
        Ok(Arc::new(store))
    }
}

/// A turso database holding one table per resource kind. Statements are
/// serialised through one connection.
pub struct Store {
    conn: tokio::sync::Mutex<Connection>,
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Store {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_path_str = db_path.to_string_lossy();
        let db: Database = Builder::new_local(&db_path_str)
            .build()
            .await
            .context("Failed to open database")?;
        let conn = db.connect().context("Failed to connect to database")?;

        // PRAGMAs that set values return the new value, so use query and ignore results
        let _ = conn.query("PRAGMA journal_mode=WAL", ()).await;
        let _ = conn.query("PRAGMA busy_timeout=5000", ()).await;

        let store = Store {
            conn: tokio::sync::Mutex::new(conn),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        // One statement per execute; turso doesn't take batches.
        for kind in ResourceKind::ALL {
            let table = kind.table();
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        row_id INTEGER PRIMARY KEY,
                        resource_id INTEGER NOT NULL,
                        archive_datetime TEXT NOT NULL,
                        msg_datetime TEXT,
                        deleted INTEGER NOT NULL DEFAULT 0,
                        data TEXT NOT NULL
                    )"
                ),
                (),
            )
            .await
            .with_context(|| format!("Failed to create {} table", table))?;

            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_resource ON {table}(resource_id)"
                ),
                (),
            )
            .await
            .with_context(|| format!("Failed to index {} table", table))?;
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS archive_runs (
                run_id TEXT PRIMARY KEY,
                target_id INTEGER NOT NULL,
                time_queued TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            (),
        )
        .await
        .context("Failed to create archive_runs table")?;
        Ok(())
    }

    async fn insert<R: StoredResource>(conn: &Connection, resource: &R) -> Result<()> {
        let data = serde_json::to_string(resource)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (resource_id, archive_datetime, msg_datetime, deleted, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                R::KIND.table()
            ),
            (
                resource.resource_id(),
                ts(resource.meta().archive_datetime),
                resource.msg_datetime().map(ts),
                resource.is_deleted() as i64,
                data,
            ),
        )
        .await
        .with_context(|| format!("Failed to save {} {}", R::KIND, resource.resource_id()))?;
        Ok(())
    }

    async fn select<R: StoredResource>(conn: &Connection, resource_id: i64) -> Result<Vec<R>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT data FROM {} WHERE resource_id = ?1 ORDER BY row_id",
                    R::KIND.table()
                ),
                [resource_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_resource(&row)?);
        }
        Ok(out)
    }

    async fn insert_plain<R: StoredResource>(&self, resource: &R) -> Result<()> {
        let conn = self.conn.lock().await;
        Self::insert(&conn, resource).await
    }
}

fn row_to_resource<R: DeserializeOwned>(row: &Row) -> Result<R> {
    let data: String = row.get(0)?;
    serde_json::from_str(&data).context("Corrupt resource row")
}

#[async_trait]
impl<R> VersionedRepo<R> for Store
where
    R: VersionedResource + StoredResource,
{
    async fn save(&self, resource: &R) -> Result<()> {
        self.insert_plain(resource).await
    }

    async fn list_all(&self, resource_id: i64) -> Result<Vec<R>> {
        let conn = self.conn.lock().await;
        Self::select(&conn, resource_id).await
    }

    async fn delete_all(&self, resource_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("DELETE FROM {} WHERE resource_id = ?1", R::KIND.table()),
            [resource_id],
        )
        .await?;
        Ok(())
    }

    async fn replace_all(&self, resource_id: i64, keep: &[R]) -> Result<()> {
        if keep.is_empty() {
            return <Self as VersionedRepo<R>>::delete_all(self, resource_id).await;
        }
        let conn = self.conn.lock().await;
        let table = R::KIND.table();
        let mut rows = conn
            .query(
                &format!("SELECT MAX(row_id) FROM {} WHERE resource_id = ?1", table),
                [resource_id],
            )
            .await?;
        let last_old = match rows.next().await? {
            Some(row) => row.get::<Option<i64>>(0)?,
            None => None,
        };
        drop(rows);

        for resource in keep {
            Self::insert(&conn, resource).await?;
        }
        if let Some(last_old) = last_old {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE resource_id = ?1 AND row_id <= ?2",
                    table
                ),
                (resource_id, last_old),
            )
            .await
            .with_context(|| format!("Failed to prune old copies of {} {}", R::KIND, resource_id))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for Store {
    async fn save_chat(&self, chat: &Chat) -> Result<()> {
        self.insert_plain(chat).await
    }

    async fn save_admin_event(&self, event: &AdminEvent) -> Result<()> {
        self.insert_plain(event).await
    }

    async fn save_archive_run(&self, run: &ArchiveRunRecord) -> Result<()> {
        let data = serde_json::to_string(run)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO archive_runs (run_id, target_id, time_queued, data)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id) DO UPDATE SET data = excluded.data",
            (
                run.run_id.as_str(),
                run.target_id,
                ts(run.time_queued),
                data,
            ),
        )
        .await
        .with_context(|| format!("Failed to save archive run {}", run.run_id))?;
        Ok(())
    }

    async fn list_archive_runs(&self) -> Result<Vec<ArchiveRunRecord>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT data FROM archive_runs ORDER BY time_queued DESC",
                (),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_resource(&row)?);
        }
        Ok(out)
    }

    async fn list_message_ids(&self) -> Result<BTreeSet<i32>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT DISTINCT resource_id FROM messages", ())
            .await?;
        let mut ids = BTreeSet::new();
        while let Some(row) = rows.next().await? {
            ids.insert(row.get::<i64>(0)? as i32);
        }
        Ok(ids)
    }

    async fn oldest_message_before(&self, before: DateTime<Utc>) -> Result<Option<Message>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT data FROM messages
                 WHERE msg_datetime IS NOT NULL AND msg_datetime < ?1
                 ORDER BY msg_datetime ASC LIMIT 1",
                [ts(before)],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_resource(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn delete_deleted_messages(&self, message_id: i32) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM messages WHERE resource_id = ?1 AND deleted = 1",
            [message_id as i64],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::remote::fixtures::{at, text_message};

    #[test]
    fn layout_paths() {
        let layout = StoreLayout::new("/tmp/arch");
        assert_eq!(
            layout.media_path(-100, 5, "jpg"),
            PathBuf::from("/tmp/arch/chats/-100/media/5.jpg")
        );
        assert_eq!(
            layout.sticker_path(None, 9, "webp"),
            PathBuf::from("/tmp/arch/stickers/Unknown/9.webp")
        );
        assert_eq!(
            layout.sticker_path(Some(3), 9, "webp"),
            PathBuf::from("/tmp/arch/stickers/3/9.webp")
        );
    }

    #[test]
    fn archived_chats_need_a_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(dir.path());
        assert!(layout.archived_chats().is_empty());

        for id in [-100, 7] {
            std::fs::create_dir_all(layout.chat_dir(id)).expect("mkdir");
            std::fs::write(layout.chat_db(id), b"").expect("touch");
        }
        // Media only, no database.
        std::fs::create_dir_all(layout.chat_dir(9).join("media")).expect("mkdir");
        std::fs::create_dir_all(dir.path().join("chats/notes")).expect("mkdir");

        assert_eq!(layout.archived_chats(), vec![-100, 7]);
    }

    #[tokio::test]
    async fn turso_store_keeps_snapshots_and_replaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("chat.db"))
            .await
            .expect("open store");

        let first = Message::from_remote(&text_message(7, 1, at(2024, 1, 1)), 201, false);
        let second = first.mark_deleted();
        VersionedRepo::<Message>::save(&store, &first).await.expect("save");
        VersionedRepo::<Message>::save(&store, &second).await.expect("save");

        let copies: Vec<Message> = VersionedRepo::<Message>::list_all(&store, 1)
            .await
            .expect("list");
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0], first);

        VersionedRepo::<Message>::replace_all(&store, 1, &[second.clone()])
            .await
            .expect("replace");
        let copies: Vec<Message> = VersionedRepo::<Message>::list_all(&store, 1)
            .await
            .expect("list");
        assert_eq!(copies, vec![second]);

        let ids = store.list_message_ids().await.expect("ids");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1]);
    }
}

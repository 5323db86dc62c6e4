//! Per-target work queues for one subsystem.
//!
//! Producers push into a sub-queue per [`QueueKey`]; workers pull from any
//! sub-queue. A dequeued [`Job`] reports completion when dropped, which is
//! what [`TargetQueues::wait_until_empty`] waits for.

use crate::error::ArchiveError;
use crate::store::ArchiveStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueKey {
    /// Work belonging to one archive run.
    Run(String),
    /// Account-wide work not tied to any run.
    Global,
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKey::Run(id) => write!(f, "run {}", id),
            QueueKey::Global => f.write_str("global"),
        }
    }
}

/// The chat a sub-queue works for.
pub struct QueueTarget {
    pub chat_id: i64,
    pub store: Arc<dyn ArchiveStore>,
}

impl fmt::Debug for QueueTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTarget")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

struct SubQueue<T> {
    target: Option<Arc<QueueTarget>>,
    items: VecDeque<T>,
    in_flight: usize,
    stop_when_empty: bool,
}

struct Registry<T> {
    queues: BTreeMap<QueueKey, SubQueue<T>>,
    closed: bool,
}

pub struct TargetQueues<T> {
    inner: Arc<Mutex<Registry<T>>>,
    changed: Arc<Notify>,
}

/// One dequeued item. Dropping it marks the item done.
pub struct Job<T> {
    pub key: QueueKey,
    pub target: Option<Arc<QueueTarget>>,
    pub item: T,
    inner: Arc<Mutex<Registry<T>>>,
    changed: Arc<Notify>,
}

impl<T> Drop for Job<T> {
    fn drop(&mut self) {
        {
            let mut registry = self.inner.lock();
            if let Some(queue) = registry.queues.get_mut(&self.key) {
                queue.in_flight = queue.in_flight.saturating_sub(1);
            }
        }
        self.changed.notify_waiters();
    }
}

impl<T> Default for TargetQueues<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TargetQueues<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                queues: BTreeMap::new(),
                closed: false,
            })),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Add an item to the sub-queue for `key`, creating it if needed. A
    /// sub-queue that is being waited on only takes forced items.
    pub fn enqueue(
        &self,
        key: QueueKey,
        target: Option<Arc<QueueTarget>>,
        item: T,
        force: bool,
    ) -> Result<(), ArchiveError> {
        {
            let mut registry = self.inner.lock();
            if registry.closed {
                log::debug!("Dropping item for {}: queues are closed", key);
                return Ok(());
            }
            let queue = registry
                .queues
                .entry(key.clone())
                .or_insert_with(|| SubQueue {
                    target: None,
                    items: VecDeque::new(),
                    in_flight: 0,
                    stop_when_empty: false,
                });
            if queue.stop_when_empty && !force {
                return Err(ArchiveError::invariant(format!(
                    "item added to queue for {} after it started draining",
                    key
                )));
            }
            if queue.target.is_none() {
                queue.target = target;
            }
            queue.items.push_back(item);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Take the next item. Queues that are being waited on go first, then
    /// other run queues, then global work.
    pub fn try_dequeue(&self) -> Option<Job<T>> {
        let mut registry = self.inner.lock();
        let key = registry
            .queues
            .iter()
            .filter(|(_, q)| !q.items.is_empty())
            .min_by_key(|(key, q)| (!q.stop_when_empty, matches!(key, QueueKey::Global)))
            .map(|(key, _)| key.clone())?;
        let queue = registry.queues.get_mut(&key)?;
        let item = queue.items.pop_front()?;
        queue.in_flight += 1;
        let target = queue.target.clone();
        Some(Job {
            key,
            target,
            item,
            inner: Arc::clone(&self.inner),
            changed: Arc::clone(&self.changed),
        })
    }

    /// Block until everything queued for `key` has been processed, then
    /// remove its sub-queue. Returns `false` if the queues were closed
    /// before that happened.
    pub async fn wait_until_empty(&self, key: &QueueKey) -> bool {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut registry = self.inner.lock();
                if registry.closed {
                    registry.queues.remove(key);
                    return false;
                }
                let Some(queue) = registry.queues.get_mut(key) else {
                    return true;
                };
                queue.stop_when_empty = true;
                if queue.items.is_empty() && queue.in_flight == 0 {
                    registry.queues.remove(key);
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Drop everything still queued and refuse further items. Idempotent.
    pub fn discard_all(&self) -> usize {
        let dropped = {
            let mut registry = self.inner.lock();
            registry.closed = true;
            registry
                .queues
                .values_mut()
                .map(|q| {
                    let n = q.items.len();
                    q.items.clear();
                    n
                })
                .sum()
        };
        self.changed.notify_waiters();
        dropped
    }

    /// Items waiting, not counting ones being processed.
    pub fn len(&self) -> usize {
        self.inner.lock().queues.values().map(|q| q.items.len()).sum()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().queues.values().map(|q| q.in_flight).sum()
    }
}

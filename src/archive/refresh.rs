//! Fresh copies of messages whose file references expired.
//!
//! Many downloads tend to fail at once for the same chat, so requests are
//! coalesced: a single background task per chat fetches a window of
//! history around each requested message and wakes everyone whose message
//! showed up in it.

use super::remote::RemoteSource;
use super::subsystem::RetryPolicy;
use crate::error::ArchiveError;
use crate::model::RemoteMessage;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

struct RefreshRequest {
    message_id: i32,
    stale: RemoteMessage,
}

#[derive(Default)]
struct ChatState {
    messages: HashMap<i32, RemoteMessage>,
    waiters: HashMap<i32, Arc<Notify>>,
    failures: HashMap<i32, String>,
    requests: VecDeque<RefreshRequest>,
    running: bool,
}

struct ChatRefresh {
    chat_id: i64,
    state: Mutex<ChatState>,
}

impl ChatRefresh {
    fn signal(&self, message_id: i32) {
        if let Some(waiter) = self.state.lock().waiters.get(&message_id) {
            waiter.notify_waiters();
        }
    }
}

pub struct MessageRefreshCache {
    remote: Arc<dyn RemoteSource>,
    retry: RetryPolicy,
    batch_size: usize,
    page_size: usize,
    chats: Mutex<HashMap<i64, Arc<ChatRefresh>>>,
    active: watch::Sender<usize>,
    windows: AtomicU64,
}

impl MessageRefreshCache {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        retry: RetryPolicy,
        batch_size: usize,
        page_size: usize,
    ) -> Arc<Self> {
        let (active, _) = watch::channel(0);
        Arc::new(Self {
            remote,
            retry,
            batch_size: batch_size.max(1),
            page_size: page_size.max(1),
            chats: Mutex::new(HashMap::new()),
            active,
            windows: AtomicU64::new(0),
        })
    }

    fn chat(&self, chat_id: i64) -> Arc<ChatRefresh> {
        let mut chats = self.chats.lock();
        Arc::clone(chats.entry(chat_id).or_insert_with(|| {
            Arc::new(ChatRefresh {
                chat_id,
                state: Mutex::new(ChatState::default()),
            })
        }))
    }

    /// A copy of the message newer than `stale`. Concurrent callers for the
    /// same chat share one fetch.
    pub async fn get_current(
        self: &Arc<Self>,
        chat_id: i64,
        message_id: i32,
        stale: &RemoteMessage,
    ) -> Result<RemoteMessage, ArchiveError> {
        let chat = self.chat(chat_id);
        let waiter = {
            let mut state = chat.state.lock();
            if let Some(current) = state.messages.get(&message_id) {
                if current != stale {
                    return Ok(current.clone());
                }
            }
            Arc::clone(
                state
                    .waiters
                    .entry(message_id)
                    .or_insert_with(|| Arc::new(Notify::new())),
            )
        };

        {
            let notified = waiter.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.submit(
                &chat,
                RefreshRequest {
                    message_id,
                    stale: stale.clone(),
                },
            );
            notified.await;
        }

        let mut state = chat.state.lock();
        // The map holds one reference and we hold the other.
        if Arc::strong_count(&waiter) <= 2 {
            state.waiters.remove(&message_id);
        }
        // A fresh copy wins over a failure left by an earlier window.
        let current = state.messages.get(&message_id);
        if let Some(current) = current.filter(|c| *c != stale) {
            return Ok(current.clone());
        }
        if let Some(reason) = state.failures.get(&message_id) {
            return Err(ArchiveError::RefreshFailed {
                chat_id,
                message_id,
                reason: reason.clone(),
            });
        }
        Err(ArchiveError::invariant(match current {
            None => format!(
                "message {} in chat {} is gone after a refresh",
                message_id, chat_id
            ),
            Some(_) => format!(
                "refreshing message {} in chat {} returned the same copy",
                message_id, chat_id
            ),
        }))
    }

    fn submit(self: &Arc<Self>, chat: &Arc<ChatRefresh>, request: RefreshRequest) {
        let spawn = {
            let mut state = chat.state.lock();
            state.requests.push_back(request);
            !std::mem::replace(&mut state.running, true)
        };
        if spawn {
            self.active.send_modify(|n| *n += 1);
            let this = Arc::clone(self);
            let chat = Arc::clone(chat);
            tokio::spawn(async move { this.drain_requests(chat).await });
        }
    }

    async fn drain_requests(self: Arc<Self>, chat: Arc<ChatRefresh>) {
        loop {
            let (request, already_fresh) = {
                let mut state = chat.state.lock();
                let Some(request) = state.requests.pop_front() else {
                    state.running = false;
                    break;
                };
                let fresh = state
                    .messages
                    .get(&request.message_id)
                    .is_some_and(|current| current != &request.stale);
                (request, fresh)
            };

            let id = request.message_id;
            if already_fresh {
                chat.state.lock().failures.remove(&id);
            } else {
                match self.refresh_window(&chat, id).await {
                    Ok(stored) => {
                        log::info!(
                            "Refreshed {} messages around {} in chat {}",
                            stored,
                            id,
                            chat.chat_id
                        );
                        chat.state.lock().failures.remove(&id);
                    }
                    Err(e) => {
                        log::warn!(
                            "Refreshing message {} in chat {} failed: {}",
                            id,
                            chat.chat_id,
                            e
                        );
                        chat.state.lock().failures.insert(id, e.to_string());
                    }
                }
            }
            chat.signal(id);
        }
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Fetch up to one batch of messages at and below `anchor` and keep
    /// the ones with media.
    async fn refresh_window(&self, chat: &ChatRefresh, anchor: i32) -> Result<usize, ArchiveError> {
        self.windows.fetch_add(1, Ordering::Relaxed);
        let remote: &dyn RemoteSource = &*self.remote;
        let chat_id = chat.chat_id;
        let mut offset = anchor.saturating_add(1);
        let mut fetched = 0;
        let mut stored = 0;
        while fetched < self.batch_size {
            let limit = self.page_size.min(self.batch_size - fetched);
            let page = self
                .retry
                .run("history refresh", move || {
                    remote.history_page(chat_id, offset, limit)
                })
                .await?;
            let count = page.len();
            let Some(oldest) = page.iter().map(|m| m.id).min() else {
                break;
            };
            fetched += count;
            offset = oldest;

            let mut refreshed = Vec::new();
            {
                let mut state = chat.state.lock();
                for message in page.into_iter().filter(|m| m.media.is_some()) {
                    refreshed.push(message.id);
                    state.failures.remove(&message.id);
                    state.messages.insert(message.id, message);
                }
            }
            stored += refreshed.len();
            for id in refreshed {
                chat.signal(id);
            }
            if count < limit {
                break;
            }
        }
        Ok(stored)
    }

    /// Resolves once no refresh task is running.
    pub async fn wait_idle(&self) {
        let mut active = self.active.subscribe();
        let _ = active.wait_for(|n| *n == 0).await;
    }

    /// Messages held across all chats.
    pub fn size(&self) -> usize {
        let chats: Vec<Arc<ChatRefresh>> = self.chats.lock().values().cloned().collect();
        chats.iter().map(|c| c.state.lock().messages.len()).sum()
    }

    /// History windows fetched so far.
    pub fn windows_fetched(&self) -> u64 {
        self.windows.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::FakeRemote;
    use crate::model::remote::fixtures::{at, photo_message, text_message};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn cache(remote: Arc<FakeRemote>) -> Arc<MessageRefreshCache> {
        let retry = RetryPolicy::new(Duration::from_secs(60), None, CancellationToken::new());
        MessageRefreshCache::new(remote, retry, 3000, 100)
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let remote = FakeRemote::new();
        remote.push_history(1, [photo_message(1, 10, 77, b"new")]);
        *remote.history_delay.lock() = Some(Duration::from_millis(50));
        let refresh = cache(Arc::clone(&remote));
        let stale = photo_message(1, 10, 77, b"old");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let refresh = Arc::clone(&refresh);
            let stale = stale.clone();
            tasks.push(tokio::spawn(async move {
                refresh.get_current(1, 10, &stale).await
            }));
        }
        for task in tasks {
            let current = task.await.expect("join").expect("refreshed");
            assert_eq!(current, photo_message(1, 10, 77, b"new"));
        }

        assert_eq!(remote.calls("history_page"), 1);
        assert_eq!(refresh.windows_fetched(), 1);
        refresh.wait_idle().await;
        assert_eq!(refresh.size(), 1);
    }

    #[tokio::test]
    async fn unchanged_copy_is_an_invariant_violation() {
        let remote = FakeRemote::new();
        let stale = photo_message(1, 10, 77, b"old");
        remote.push_history(1, [stale.clone()]);
        let refresh = cache(remote);

        let err = refresh.get_current(1, 10, &stale).await.expect_err("no-op");
        assert!(matches!(err, ArchiveError::Invariant(_)));
    }

    #[tokio::test]
    async fn missing_message_is_an_invariant_violation() {
        let remote = FakeRemote::new();
        remote.push_history(1, [text_message(1, 10, at(2024, 1, 1))]);
        let refresh = cache(remote);

        let stale = photo_message(1, 10, 77, b"old");
        let err = refresh.get_current(1, 10, &stale).await.expect_err("gone");
        assert!(matches!(err, ArchiveError::Invariant(_)));
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_to_the_waiter() {
        let remote = FakeRemote::new();
        remote.inaccessible.lock().insert(1);
        let refresh = cache(remote);

        let stale = photo_message(1, 10, 77, b"old");
        let err = refresh.get_current(1, 10, &stale).await.expect_err("private");
        assert!(matches!(err, ArchiveError::RefreshFailed { message_id: 10, .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn later_window_clears_an_earlier_failure() {
        let remote = FakeRemote::new();
        remote.inaccessible.lock().insert(1);
        let refresh = cache(Arc::clone(&remote));

        let stale = photo_message(1, 10, 77, b"old");
        refresh.get_current(1, 10, &stale).await.expect_err("private");
        assert!(refresh.chat(1).state.lock().failures.contains_key(&10));

        remote.inaccessible.lock().clear();
        remote.push_history(
            1,
            [photo_message(1, 10, 77, b"new"), photo_message(1, 12, 78, b"new")],
        );
        let stale_12 = photo_message(1, 12, 78, b"old");
        refresh.get_current(1, 12, &stale_12).await.expect("refreshed");
        refresh.wait_idle().await;

        assert!(refresh.chat(1).state.lock().failures.is_empty());
        let current = refresh.get_current(1, 10, &stale).await.expect("cached");
        assert_eq!(current, photo_message(1, 10, 77, b"new"));
    }

    #[tokio::test]
    async fn window_covers_the_anchor_and_older_messages() {
        let remote = FakeRemote::new();
        remote.push_history(1, (5..=15).map(|id| photo_message(1, id, 100 + id as i64, b"new")));
        let refresh = cache(Arc::clone(&remote));

        let stale = photo_message(1, 10, 110, b"old");
        refresh.get_current(1, 10, &stale).await.expect("refreshed");
        refresh.wait_idle().await;
        assert_eq!(refresh.size(), 6);

        // Already cached and newer than what the caller holds.
        let stale = photo_message(1, 7, 107, b"old");
        let current = refresh.get_current(1, 7, &stale).await.expect("cached");
        assert_eq!(current.id, 7);
        assert_eq!(remote.calls("history_page"), 1);
    }
}

//! Background worker pools.
//!
//! A [`Subsystem`] owns a set of [`TargetQueues`] and knows how to process
//! one item. A [`SubsystemRunner`] drives a fixed pool of workers over it
//! through the `idle -> running -> draining -> stopped` lifecycle.

use super::queue::{Job, TargetQueues};
use crate::error::{ArchiveError, FetchError};
use crate::shutdown::ShutdownController;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Subsystem: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn queues(&self) -> &TargetQueues<Self::Item>;

    /// Handle one item. Expected remote failures are dealt with here;
    /// whatever is returned as an error is treated as fatal unless it is
    /// a classified failure.
    async fn process(&self, job: &Job<Self::Item>) -> Result<(), ArchiveError>;

    fn cache_size(&self) -> usize {
        0
    }

    fn retries(&self) -> u64 {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubsystemStatus {
    pub name: String,
    pub state: SubsystemState,
    pub queued: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub retries: u64,
    pub cache_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

struct RunnerShared {
    name: &'static str,
    state: Mutex<SubsystemState>,
    abort: CancellationToken,
    idle_poll: Duration,
    processed: AtomicU64,
    failure: Mutex<Option<String>>,
    shutdown: ShutdownController,
}

impl RunnerShared {
    fn is_draining(&self) -> bool {
        !matches!(*self.state.lock(), SubsystemState::Running)
    }
}

pub struct SubsystemRunner<S: Subsystem> {
    subsystem: Arc<S>,
    shared: Arc<RunnerShared>,
    workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: Subsystem> SubsystemRunner<S> {
    pub fn new(
        subsystem: Arc<S>,
        workers: usize,
        idle_poll: Duration,
        shutdown: ShutdownController,
    ) -> Self {
        let shared = Arc::new(RunnerShared {
            name: subsystem.name(),
            state: Mutex::new(SubsystemState::Idle),
            abort: shutdown.abort_child(),
            idle_poll,
            processed: AtomicU64::new(0),
            failure: Mutex::new(None),
            shutdown,
        });
        Self {
            subsystem,
            shared,
            workers: workers.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn subsystem(&self) -> &Arc<S> {
        &self.subsystem
    }

    pub fn state(&self) -> SubsystemState {
        *self.shared.state.lock()
    }

    pub fn start(&self) -> Result<(), ArchiveError> {
        {
            let mut state = self.shared.state.lock();
            if *state != SubsystemState::Idle {
                return Err(ArchiveError::invariant(format!(
                    "{} started twice",
                    self.shared.name
                )));
            }
            *state = SubsystemState::Running;
        }
        let mut handles = self.handles.lock();
        for worker in 0..self.workers {
            let subsystem = Arc::clone(&self.subsystem);
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(worker_loop(subsystem, shared, worker)));
        }
        log::info!("{} started with {} workers", self.shared.name, self.workers);
        Ok(())
    }

    /// Stop taking new work once the queues are empty.
    pub fn drain(&self) {
        let mut state = self.shared.state.lock();
        match *state {
            SubsystemState::Running => {
                log::info!(
                    "{} draining ({} queued)",
                    self.shared.name,
                    self.subsystem.queues().len()
                );
                *state = SubsystemState::Draining;
            }
            SubsystemState::Idle => *state = SubsystemState::Stopped,
            SubsystemState::Draining | SubsystemState::Stopped => {}
        }
    }

    /// Stop workers without finishing their current item and drop the queues.
    pub fn abort(&self) {
        self.drain();
        if !self.shared.abort.is_cancelled() {
            log::warn!("{} aborting", self.shared.name);
            self.shared.abort.cancel();
        }
        let dropped = self.subsystem.queues().discard_all();
        if dropped > 0 {
            log::warn!("{} discarded {} queued items", self.shared.name, dropped);
        }
    }

    /// Drain (or abort, if `fast`) and wait for every worker to exit.
    pub async fn stop(&self, fast: bool) -> Result<(), ArchiveError> {
        if fast {
            self.abort();
        } else {
            self.drain();
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("{} worker panicked: {}", self.shared.name, e);
                self.shared
                    .failure
                    .lock()
                    .get_or_insert_with(|| format!("worker panicked: {}", e));
            }
        }
        *self.shared.state.lock() = SubsystemState::Stopped;
        match self.shared.failure.lock().clone() {
            Some(reason) => Err(ArchiveError::Other(anyhow::anyhow!(
                "{} failed: {}",
                self.shared.name,
                reason
            ))),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> SubsystemStatus {
        let queues = self.subsystem.queues();
        SubsystemStatus {
            name: self.shared.name.to_string(),
            state: self.state(),
            queued: queues.len(),
            in_flight: queues.in_flight(),
            processed: self.shared.processed.load(Ordering::Relaxed),
            retries: self.subsystem.retries(),
            cache_entries: self.subsystem.cache_size(),
            failure: self.shared.failure.lock().clone(),
        }
    }
}

async fn worker_loop<S: Subsystem>(subsystem: Arc<S>, shared: Arc<RunnerShared>, worker: usize) {
    loop {
        if shared.abort.is_cancelled() {
            break;
        }
        let job = match subsystem.queues().try_dequeue() {
            Some(job) => job,
            None => {
                if shared.is_draining() {
                    break;
                }
                tokio::select! {
                    _ = shared.abort.cancelled() => break,
                    _ = tokio::time::sleep(shared.idle_poll) => {}
                }
                continue;
            }
        };

        let result = tokio::select! {
            biased;
            _ = shared.abort.cancelled() => {
                log::warn!("{} worker {} abandoned an item on abort", shared.name, worker);
                break;
            }
            result = subsystem.process(&job) => result,
        };
        drop(job);

        match result {
            Ok(()) => {
                shared.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(ArchiveError::Aborted) => break,
            Err(e) if !e.is_fatal() => {
                log::warn!("{} skipped an item: {}", shared.name, e);
            }
            Err(e) => {
                log::error!("{} has failed: {:#}", shared.name, e);
                shared.failure.lock().get_or_insert_with(|| e.to_string());
                shared.shutdown.abort();
                break;
            }
        }
    }

    if shared.abort.is_cancelled() {
        subsystem.queues().discard_all();
    }
    log::debug!("{} worker {} exited", shared.name, worker);
}

/// Retries unclassified remote failures with a fixed backoff.
/// Classified failures are returned to the caller untouched.
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: Duration,
    max_retries: Option<u32>,
    retries: Arc<AtomicU64>,
    abort: CancellationToken,
}

impl RetryPolicy {
    pub fn new(backoff: Duration, max_retries: Option<u32>, abort: CancellationToken) -> Self {
        Self {
            backoff,
            max_retries,
            retries: Arc::new(AtomicU64::new(0)),
            abort,
        }
    }

    /// Retries performed so far, across all calls.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(FetchError::Other(e)) => {
                    if self.max_retries.is_some_and(|max| attempt >= max) {
                        log::error!("{} failed after {} retries: {:#}", what, attempt, e);
                        return Err(FetchError::Other(e).into());
                    }
                    attempt += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "{} failed (attempt {}), retrying in {}s: {:#}",
                        what,
                        attempt,
                        self.backoff.as_secs(),
                        e
                    );
                    tokio::select! {
                        _ = self.abort.cancelled() => return Err(ArchiveError::Aborted),
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
                Err(classified) => return Err(classified.into()),
            }
        }
    }
}

//! Downloading files to the archive, repairing expired references.

use super::refresh::MessageRefreshCache;
use super::remote::RemoteSource;
use super::subsystem::RetryPolicy;
use crate::error::{ArchiveError, FetchError};
use crate::model::{FileLocation, RemoteMessage};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FileFetcher {
    remote: Arc<dyn RemoteSource>,
    retry: RetryPolicy,
    refresher: Arc<MessageRefreshCache>,
    refresh_attempts: u32,
}

fn part_path(dest: &Path) -> PathBuf {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

impl FileFetcher {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        retry: RetryPolicy,
        refresher: Arc<MessageRefreshCache>,
        refresh_attempts: u32,
    ) -> Self {
        Self {
            remote,
            retry,
            refresher,
            refresh_attempts,
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn exists(dest: &Path) -> Result<bool, ArchiveError> {
        let exists = tokio::fs::try_exists(dest)
            .await
            .with_context(|| format!("Failed to check {}", dest.display()))?;
        Ok(exists)
    }

    /// Download `location` into `dest`. The file only appears under its
    /// final name once complete.
    pub async fn fetch(&self, location: &FileLocation, dest: &Path) -> Result<(), ArchiveError> {
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let part = part_path(dest);
        let remote: &dyn RemoteSource = &*self.remote;
        let part_ref: &Path = &part;
        let result = self
            .retry
            .run("download", move || remote.download(location, part_ref))
            .await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, dest)
            .await
            .with_context(|| format!("Failed to move download into {}", dest.display()))?;
        log::debug!("Downloaded {} ({} bytes)", dest.display(), location.size.unwrap_or(0));
        Ok(())
    }

    /// Download the file `pick` finds in `message`, asking the refresh
    /// cache for a newer copy of the message whenever the reference has
    /// expired. Returns `false` if a refreshed copy no longer carries a
    /// file.
    pub async fn fetch_from_message<F>(
        &self,
        message: &RemoteMessage,
        dest: &Path,
        pick: F,
    ) -> Result<bool, ArchiveError>
    where
        F: Fn(&RemoteMessage) -> Option<FileLocation> + Send + Sync,
    {
        let mut current = message.clone();
        let mut refreshes = 0;
        loop {
            let Some(location) = pick(&current) else {
                log::warn!(
                    "Message {} in chat {} no longer has a file to download",
                    current.id,
                    current.chat_id
                );
                return Ok(false);
            };
            match self.fetch(&location, dest).await {
                Ok(()) => return Ok(true),
                Err(ArchiveError::Fetch(FetchError::ReferenceExpired(what)))
                    if refreshes < self.refresh_attempts =>
                {
                    refreshes += 1;
                    log::info!(
                        "File reference for {} expired, refreshing message {} in chat {}",
                        what,
                        current.id,
                        current.chat_id
                    );
                    current = self
                        .refresher
                        .get_current(current.chat_id, current.id, &current)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::FakeRemote;
    use crate::model::remote::fixtures::photo_message;
    use crate::model::MediaRef;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn fetcher(remote: Arc<FakeRemote>, attempts: u32) -> FileFetcher {
        let retry = RetryPolicy::new(Duration::from_secs(60), None, CancellationToken::new());
        let refresher = MessageRefreshCache::new(remote.clone(), retry.clone(), 3000, 100);
        FileFetcher::new(remote, retry, refresher, attempts)
    }

    fn photo(msg: &RemoteMessage) -> Option<FileLocation> {
        match msg.media.as_ref()? {
            MediaRef::Photo { location } => Some(location.clone()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn expired_reference_is_refreshed_once() {
        let remote = FakeRemote::new();
        remote.expired.lock().insert(b"old".to_vec());
        remote.push_history(3, [photo_message(3, 20, 500, b"new")]);
        let files = fetcher(Arc::clone(&remote), 3);
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("media").join("500.jpg");

        let stale = photo_message(3, 20, 500, b"old");
        let done = files.fetch_from_message(&stale, &dest, photo).await.expect("download");
        assert!(done);
        assert_eq!(remote.calls("download"), 2);
        assert_eq!(remote.calls("history_page"), 1);
        assert!(dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn refreshes_are_bounded() {
        let remote = FakeRemote::new();
        remote.expired.lock().insert(b"old".to_vec());
        remote.expired.lock().insert(b"also-old".to_vec());
        remote.push_history(3, [photo_message(3, 20, 500, b"also-old")]);
        let files = fetcher(Arc::clone(&remote), 1);
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("500.jpg");

        let stale = photo_message(3, 20, 500, b"old");
        let err = files
            .fetch_from_message(&stale, &dest, photo)
            .await
            .expect_err("still expired");
        assert!(matches!(err, ArchiveError::Fetch(FetchError::ReferenceExpired(_))));
        assert!(!err.is_fatal());
        assert!(!dest.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_failures_are_retried() {
        let remote = FakeRemote::new();
        *remote.download_failures.lock() = 2;
        let files = fetcher(Arc::clone(&remote), 3);
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("1.jpg");

        let msg = photo_message(3, 20, 1, b"ok");
        let location = photo(&msg).expect("photo");
        files.fetch(&location, &dest).await.expect("download");
        assert_eq!(files.retry().retries(), 2);
        assert!(dest.exists());
    }
}

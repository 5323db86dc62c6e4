//! Error types and context wrappers for grammers errors.
//!
//! The archive engine works with [`ArchiveError`], which separates the
//! remote failures it knows how to recover from ([`FetchError`]) from
//! logic defects and everything else. Command-level code keeps using
//! `anyhow` with [`TgErrorContext`].

use anyhow::{Context, Result};
use thiserror::Error;

/// Failure of a remote call, classified by what the archiver can do about it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0} is private or no longer accessible")]
    Inaccessible(String),
    #[error("file reference expired for {0}")]
    ReferenceExpired(String),
    #[error("sticker set {0} no longer exists")]
    SetInvalid(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    pub fn is_classified(&self) -> bool {
        !matches!(self, FetchError::Other(_))
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A logic defect. Never retried.
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("archive aborted")]
    Aborted,
    #[error("could not refresh message {message_id} in chat {chat_id}: {reason}")]
    RefreshFailed {
        chat_id: i64,
        message_id: i32,
        reason: String,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArchiveError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        ArchiveError::Invariant(msg.into())
    }

    /// Whether the error must stop the whole archiver.
    pub fn is_fatal(&self) -> bool {
        match self {
            ArchiveError::Invariant(_) | ArchiveError::Other(_) => true,
            ArchiveError::Fetch(e) => !e.is_classified(),
            ArchiveError::Aborted | ArchiveError::RefreshFailed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcClass {
    Inaccessible,
    ReferenceExpired,
    SetInvalid,
}

/// Map a Telegram RPC error name to the failure classes the archiver handles.
pub fn classify_rpc_name(name: &str) -> Option<RpcClass> {
    match name {
        "CHANNEL_PRIVATE" | "CHAT_FORBIDDEN" | "CHANNEL_INVALID" | "CHAT_ADMIN_REQUIRED"
        | "USER_BANNED_IN_CHANNEL" | "PEER_ID_INVALID" => Some(RpcClass::Inaccessible),
        "STICKERSET_INVALID" => Some(RpcClass::SetInvalid),
        n if n.starts_with("FILE_REFERENCE_") => Some(RpcClass::ReferenceExpired),
        _ => None,
    }
}

/// Extension trait to add Telegram-specific context to errors.
pub trait TgErrorContext<T> {
    /// Add context for authorization check.
    fn context_auth_check(self) -> Result<T>;

    /// Add context for generic API invocation.
    fn context_invoke(self, operation: &str) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> TgErrorContext<T>
    for std::result::Result<T, E>
{
    fn context_auth_check(self) -> Result<T> {
        self.context("Failed to check authorization status")
    }

    fn context_invoke(self, operation: &str) -> Result<T> {
        self.with_context(|| format!("Telegram API call failed: {}", operation))
    }
}

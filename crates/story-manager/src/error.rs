//! Error type for `story-manager`.

use story_core::remote::RemoteError;
use thiserror::Error;

/// A failed manager operation.
///
/// `Clone` because one failure can resolve many coalesced waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  /// Bad caller input. Rejected before anything is persisted.
  #[error("invalid request: {0}")]
  Validation(String),

  #[error("story not found")]
  StoryNotFound,

  /// Nothing more to load.
  #[error("not found")]
  NotFound,

  #[error("remote error: {0}")]
  Remote(#[from] RemoteError),

  #[error("upload failed: {0}")]
  Upload(String),

  #[error("storage error: {0}")]
  Storage(String),

  /// The manager shut down before the request could complete.
  #[error("request aborted")]
  Aborted,
}

impl Error {
  pub(crate) fn validation(message: impl Into<String>) -> Self {
    Self::Validation(message.into())
  }

  pub(crate) fn storage(err: impl std::error::Error) -> Self {
    Self::Storage(err.to_string())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

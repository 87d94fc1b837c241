//! Error type for `story-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] story_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  /// A `list_id` column held something other than a known list name.
  #[error("unknown story list: {0:?}")]
  UnknownList(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Error types for `story-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown intent kind: {0:?}")]
  UnknownIntentKind(String),

  #[error("malformed record: {0}")]
  Malformed(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Conversions between story-core types and their SQLite column values.
//!
//! Story lists are stored by name (`"main"`, `"archive"`), positions as the
//! raw order and owner integers, intent payloads as compact JSON text.

use std::str::FromStr as _;

use story_core::{
  active::ListPosition,
  ids::{LogEventId, OwnerId, StoryId, StoryKey, StoryListId},
  intent::IntentRecord,
  store::StoredStory,
};

use crate::{Error, Result};

// ─── StoryListId ─────────────────────────────────────────────────────────────

pub fn encode_list(list: StoryListId) -> &'static str {
  match list {
    StoryListId::Main => "main",
    StoryListId::Archive => "archive",
  }
}

pub fn decode_list(s: &str) -> Result<StoryListId> {
  StoryListId::from_str(s).map_err(|_| Error::UnknownList(s.to_owned()))
}

// ─── Expiry ──────────────────────────────────────────────────────────────────

/// Zero means "never swept" and is stored as NULL.
pub fn encode_expires_at(expires_at: i32) -> Option<i64> {
  (expires_at > 0).then_some(i64::from(expires_at))
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A `stories` row as read back from SQLite.
pub struct RawStory {
  pub owner_id: i64,
  pub story_id: i32,
  pub data:     Vec<u8>,
}

impl RawStory {
  pub fn into_stored(self) -> StoredStory {
    StoredStory {
      key:  StoryKey::new(OwnerId(self.owner_id), StoryId(self.story_id)),
      data: self.data,
    }
  }
}

/// An `active_stories` row as read back by the list pager.
pub struct RawActiveRow {
  pub owner_id:    i64,
  pub story_order: i64,
  pub data:        Vec<u8>,
}

impl RawActiveRow {
  pub fn position(&self) -> ListPosition {
    ListPosition::new(self.story_order, OwnerId(self.owner_id))
  }
}

/// An `intents` row as read back from SQLite.
pub struct RawIntent {
  pub log_event_id: i64,
  pub kind:         String,
  pub payload:      String,
}

impl RawIntent {
  /// The payload is passed through unparsed; decoding is per record.
  pub fn into_record(self) -> IntentRecord {
    // Row ids come from AUTOINCREMENT and are always positive.
    let id = u64::try_from(self.log_event_id).unwrap_or_default();
    IntentRecord {
      id:      LogEventId(id),
      kind:    self.kind,
      payload: self.payload,
    }
  }
}

pub fn encode_log_event_id(id: LogEventId) -> i64 {
  i64::try_from(id.0).unwrap_or(i64::MAX)
}

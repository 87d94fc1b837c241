//! Strongly-typed identifiers.
//!
//! Story identifiers are either server-assigned (strictly positive) or a
//! local placeholder for a story that has not been confirmed yet. Only
//! server identifiers are valid cache and index keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

// ─── Owners and stories ──────────────────────────────────────────────────────

/// The user who posted a story.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl OwnerId {
  pub fn is_valid(self) -> bool { self.0 > 0 }
}

impl fmt::Display for OwnerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "owner {}", self.0)
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct StoryId(pub i32);

impl StoryId {
  /// The empty identifier: a story that has not been created on the server.
  pub const NONE: Self = Self(0);

  pub fn is_server(self) -> bool { self.0 > 0 }

  pub fn is_none(self) -> bool { self.0 == 0 }
}

impl fmt::Display for StoryId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "story {}", self.0)
  }
}

/// Owner plus story identifier; the primary key of every story map.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
pub struct StoryKey {
  pub owner:    OwnerId,
  pub story_id: StoryId,
}

impl StoryKey {
  pub fn new(owner: OwnerId, story_id: StoryId) -> Self {
    Self { owner, story_id }
  }

  pub fn is_valid(&self) -> bool {
    self.owner.is_valid() && !self.story_id.is_none()
  }

  pub fn is_server(&self) -> bool {
    self.owner.is_valid() && self.story_id.is_server()
  }
}

impl fmt::Display for StoryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} of {}", self.story_id, self.owner)
  }
}

// ─── Process-local handles ───────────────────────────────────────────────────

/// Process-local handle assigned when a story enters the cache. Never
/// persisted; zero means unregistered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u64);

impl GlobalId {
  pub fn is_registered(self) -> bool { self.0 != 0 }
}

/// Identifier of a record in the durable intent log.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogEventId(pub u64);

impl fmt::Display for LogEventId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Media file known to the uploader.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct FileId(pub i64);

/// An external object (typically a message) that embeds a story and wants
/// to hear when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

// ─── Story lists ─────────────────────────────────────────────────────────────

/// The two story lists. Every owner with active stories is in at most one.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StoryListId {
  Main,
  Archive,
}

impl StoryListId {
  /// Position in a two-element array of per-list state.
  pub fn index(self) -> usize {
    match self {
      Self::Main => 0,
      Self::Archive => 1,
    }
  }
}

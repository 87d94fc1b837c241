//! Queued story mutations.

use serde::{Deserialize, Serialize};

use crate::{
  ids::{FileId, LogEventId, OwnerId, StoryId, StoryKey},
  story::{Caption, Story, StoryContent},
};

// ─── Ordering ────────────────────────────────────────────────────────────────

/// Priority class of a queued mutation. Creations go before edits.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum OpClass {
  #[default]
  Create,
  Edit,
}

/// Position of a mutation in the upload queue: class first, then the
/// submission sequence number.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct PendingOrder {
  pub class: OpClass,
  pub seq:   u32,
}

impl PendingOrder {
  pub fn create(seq: u32) -> Self { Self { class: OpClass::Create, seq } }

  pub fn edit(seq: u32) -> Self { Self { class: OpClass::Edit, seq } }
}

// ─── Pending story ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingKind {
  /// A new story. `random_id` lets the server deduplicate a resent request.
  Send { random_id: i64 },
  /// An edit of an existing story. The generation is reassigned whenever
  /// the edit is (re)started, so it is never persisted.
  Edit {
    #[serde(skip)]
    generation: u64,
  },
}

/// A send or edit on its way to the server.
///
/// The order, log event id and re-upload flag are runtime bookkeeping and are
/// rebuilt on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStory {
  pub owner:          OwnerId,
  /// `StoryId::NONE` for a new story.
  pub story_id:       StoryId,
  pub kind:           PendingKind,
  pub story:          Story,
  #[serde(skip)]
  pub order:          PendingOrder,
  #[serde(skip)]
  pub log_event_id:   Option<LogEventId>,
  #[serde(skip)]
  pub was_reuploaded: bool,
}

impl PendingStory {
  pub fn new_send(owner: OwnerId, seq: u32, random_id: i64, story: Story) -> Self {
    Self {
      owner,
      story_id: StoryId::NONE,
      kind: PendingKind::Send { random_id },
      story,
      order: PendingOrder::create(seq),
      log_event_id: None,
      was_reuploaded: false,
    }
  }

  pub fn new_edit(key: StoryKey, seq: u32, generation: u64, story: Story) -> Self {
    Self {
      owner: key.owner,
      story_id: key.story_id,
      kind: PendingKind::Edit { generation },
      story,
      order: PendingOrder::edit(seq),
      log_event_id: None,
      was_reuploaded: false,
    }
  }

  pub fn key(&self) -> StoryKey { StoryKey::new(self.owner, self.story_id) }

  pub fn is_edit(&self) -> bool { self.story_id.is_server() }

  pub fn generation(&self) -> Option<u64> {
    match self.kind {
      PendingKind::Edit { generation } => Some(generation),
      PendingKind::Send { .. } => None,
    }
  }

  pub fn file(&self) -> Option<FileId> { self.story.file() }
}

// ─── Being edited ────────────────────────────────────────────────────────────

/// The shadow state of an edit in flight. Callers see this content and
/// caption until the edit completes or is superseded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeingEditedStory {
  pub content:      Option<StoryContent>,
  pub caption:      Caption,
  pub edit_caption: bool,
  pub log_event_id: Option<LogEventId>,
}

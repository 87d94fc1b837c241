//! Outbound view models and the notifications that carry them.

use serde::{Deserialize, Serialize};

use crate::{
  ids::{ContextId, OwnerId, StoryId, StoryKey, StoryListId},
  story::{Caption, InteractionInfo, PrivacySetting, StoryContent, StoryInfo},
  viewers::StoryViewer,
};

/// A story as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryView {
  pub key:                      StoryKey,
  pub date:                     i32,
  pub is_being_edited:          bool,
  pub is_edited:                bool,
  pub is_pinned:                bool,
  pub is_visible_only_for_self: bool,
  pub can_be_forwarded:         bool,
  pub can_be_replied:           bool,
  pub can_get_viewers:          bool,
  pub has_expired_viewers:      bool,
  pub interaction:              InteractionInfo,
  pub privacy:                  PrivacySetting,
  pub content:                  StoryContent,
  pub caption:                  Caption,
}

/// The active stories of one owner as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStoriesView {
  pub owner:             OwnerId,
  pub list:              Option<StoryListId>,
  /// The public order; zero until the list has been fetched this far.
  pub order:             i64,
  pub max_read_story_id: StoryId,
  pub stories:           Vec<StoryInfo>,
}

/// A page of stories with the server total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoriesView {
  pub total_count: i32,
  pub stories:     Vec<StoryView>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewersView {
  pub total_count: i32,
  pub viewers:     Vec<StoryViewer>,
}

/// A change notification. Each is emitted only when the value differs from
/// what was last dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
  Story(Box<StoryView>),
  StoryDeleted(StoryKey),
  ChatActiveStories(ActiveStoriesView),
  StoryListChatCount { list: StoryListId, count: i32 },
  /// A story embedded in `context` has changed.
  StoryReferenceChanged { context: ContextId, key: StoryKey },
}

/// Receives computed updates; delivery is the sink's concern.
pub trait UpdateSink: Send + Sync {
  fn send(&self, update: Update);
}

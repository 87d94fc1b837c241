//! Per-owner active stories and their position in a story list.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{
  ids::{OwnerId, StoryId, StoryListId},
  story::StoryInfo,
};

// ─── List position ───────────────────────────────────────────────────────────

/// A point in a story list. Lists are sorted by descending order, ties broken
/// by descending owner, so `a < b` means `a` is presented before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListPosition {
  pub order: i64,
  pub owner: OwnerId,
}

impl ListPosition {
  /// Before every real position: nothing has been fetched yet.
  pub const START: Self = Self { order: i64::MAX, owner: OwnerId(0) };
  /// After every real position: the whole list has been fetched.
  pub const END: Self = Self { order: 0, owner: OwnerId(0) };

  pub fn new(order: i64, owner: OwnerId) -> Self { Self { order, owner } }
}

impl Ord for ListPosition {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .order
      .cmp(&self.order)
      .then_with(|| other.owner.cmp(&self.owner))
  }
}

impl PartialOrd for ListPosition {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

// ─── Order ───────────────────────────────────────────────────────────────────

/// The inputs of an owner's private order besides the latest story date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderBits {
  pub is_premium:   bool,
  pub is_changelog: bool,
  pub has_unread:   bool,
  pub is_self:      bool,
}

/// Composite sort key: the latest story date in the low bits, then premium,
/// official-channel, unread and self flags in increasing significance.
pub fn private_order(last_story_date: i32, bits: OrderBits) -> i64 {
  let mut order = i64::from(last_story_date);
  if bits.is_premium {
    order += 1 << 33;
  }
  if bits.is_changelog {
    order += 1 << 34;
  }
  if bits.has_unread {
    order += 1 << 35;
  }
  if bits.is_self {
    order += 1 << 36;
  }
  order
}

// ─── Active stories ──────────────────────────────────────────────────────────

/// In-memory active stories of one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveStories {
  /// Server identifiers in ascending order.
  pub story_ids:         Vec<StoryId>,
  pub max_read_story_id: StoryId,
  pub list:              Option<StoryListId>,
  pub private_order:     i64,
  /// Equals `private_order` once the list frontier has reached this owner,
  /// zero otherwise.
  pub public_order:      i64,
}

impl ActiveStories {
  pub fn last_story_id(&self) -> Option<StoryId> {
    self.story_ids.last().copied()
  }

  pub fn has_unread(&self) -> bool {
    self
      .last_story_id()
      .is_some_and(|last| self.max_read_story_id.0 < last.0)
  }

  pub fn position(&self, owner: OwnerId) -> ListPosition {
    ListPosition::new(self.private_order, owner)
  }
}

/// Persisted form of [`ActiveStories`]. Orders and list membership are
/// recomputed on load, so only the stories and read watermark are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedActiveStories {
  pub max_read_story_id: StoryId,
  pub stories:           Vec<StoryInfo>,
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use super::*;

  #[test]
  fn positions_sort_by_descending_order_then_owner() {
    let set: BTreeSet<_> = [
      ListPosition::new(10, OwnerId(1)),
      ListPosition::new(30, OwnerId(2)),
      ListPosition::new(10, OwnerId(5)),
    ]
    .into_iter()
    .collect();
    let owners: Vec<_> = set.iter().map(|p| p.owner.0).collect();
    assert_eq!(owners, vec![2, 5, 1]);
  }

  #[test]
  fn start_and_end_bracket_every_position() {
    let p = ListPosition::new(1 << 36, OwnerId(42));
    assert!(ListPosition::START < p);
    assert!(p < ListPosition::END);
  }

  #[test]
  fn private_order_bits_dominate_dates() {
    let plain = private_order(2_000_000_000, OrderBits::default());
    let unread = private_order(5, OrderBits { has_unread: true, ..Default::default() });
    assert!(unread > plain);
    let own = private_order(5, OrderBits { is_self: true, ..Default::default() });
    assert!(own > unread);
  }

  #[test]
  fn saved_active_stories_round_trip() {
    let saved = SavedActiveStories {
      max_read_story_id: StoryId(3),
      stories:           vec![StoryInfo {
        story_id:             StoryId(4),
        date:                 100,
        expire_date:          200,
        is_for_close_friends: true,
      }],
    };
    let bytes = serde_json::to_vec(&saved).unwrap();
    let parsed: SavedActiveStories = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed, saved);
  }
}

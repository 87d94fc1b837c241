//! Manager tunables.

use std::ops::RangeInclusive;

use serde::Deserialize;
use story_core::ids::OwnerId;

const DAY: i32 = 86_400;
const HOUR: i32 = 3_600;

/// Tunables of the story manager. Every field has a default, so an empty
/// configuration source is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
  /// Persist stories, lists and intents. Without it nothing survives a
  /// restart and no intent is written.
  pub use_database:                   bool,
  /// Seconds between reloads of an opened story. Half of it is how long a
  /// story found inaccessible is not reloaded again.
  pub opened_story_poll_period:       i32,
  /// A referenced story received longer ago than this is reloaded when
  /// viewed.
  pub viewed_story_poll_period:       i32,
  /// First batch size of the expired-story sweep.
  pub expired_stories_batch:          u32,
  /// Seconds between sweeps once a batch comes back short.
  pub expired_sweep_delay:            RangeInclusive<u32>,
  /// How long after expiry the owner can still list viewers.
  pub story_viewers_expiration_delay: i32,
  pub max_viewed_stories_batch:       usize,
  pub max_views_query:                usize,
  /// Seconds between view-count refreshes of opened owned stories.
  pub interaction_info_update_period: u64,
  /// The official channel whose stories are always subscribed.
  pub changelog_owner_id:             OwnerId,
  /// Also allow the short active periods used on test servers.
  pub test_mode:                      bool,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self {
      use_database:                   true,
      opened_story_poll_period:       60,
      viewed_story_poll_period:       300,
      expired_stories_batch:          50,
      expired_sweep_delay:            300..=420,
      story_viewers_expiration_delay: DAY,
      max_viewed_stories_batch:       200,
      max_views_query:                100,
      interaction_info_update_period: 10,
      changelog_owner_id:             OwnerId(777_000),
      test_mode:                      false,
    }
  }
}

impl ManagerConfig {
  /// Whether a story may stay active for `period` seconds.
  pub fn is_allowed_active_period(&self, period: i32, is_premium: bool) -> bool {
    if period == DAY {
      return true;
    }
    if self.test_mode && (period == 60 || period == 300) {
      return true;
    }
    is_premium && [6 * HOUR, 12 * HOUR, 2 * DAY, 3 * DAY, 7 * DAY].contains(&period)
  }

  pub(crate) fn inaccessible_window(&self) -> i32 { self.opened_story_poll_period / 2 }
}

//! Story list pagination state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::active::ListPosition;

/// What survives a restart of a list's server pagination: the opaque
/// continuation token, the last server total and whether more pages exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedStoryList {
  pub state:       String,
  pub total_count: i32,
  pub has_more:    bool,
}

/// One story list: the owners it holds in presentation order plus the
/// server and database pagination cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryList {
  /// Opaque server continuation token; empty before the first page.
  pub state:                   String,
  /// Last total reported by the server, `-1` while unknown.
  pub server_total_count:      i32,
  /// Last total dispatched to callers, `-1` before the first dispatch.
  pub sent_total_count:        i32,
  /// Whether `server_total_count` came from this session's server pages.
  pub server_total_reloaded:   bool,
  pub server_has_more:         bool,
  pub database_has_more:       bool,
  /// Furthest position whose owners are known to be complete.
  pub frontier:                ListPosition,
  pub last_loaded_db_position: ListPosition,
  pub ordered:                 BTreeSet<ListPosition>,
}

impl Default for StoryList {
  fn default() -> Self {
    Self {
      state:                   String::new(),
      server_total_count:      -1,
      sent_total_count:        -1,
      server_total_reloaded:   false,
      server_has_more:         true,
      database_has_more:       false,
      frontier:                ListPosition::START,
      last_loaded_db_position: ListPosition::START,
      ordered:                 BTreeSet::new(),
    }
  }
}

impl StoryList {
  /// Resume from persisted state. The database is always worth reading
  /// again after a restart.
  pub fn restore(saved: SavedStoryList) -> Self {
    Self {
      state: saved.state,
      server_total_count: saved.total_count.max(0),
      server_has_more: saved.has_more,
      database_has_more: true,
      ..Self::default()
    }
  }

  pub fn saved(&self) -> SavedStoryList {
    SavedStoryList {
      state:       self.state.clone(),
      total_count: self.server_total_count.max(0),
      has_more:    self.server_has_more,
    }
  }

  pub fn is_fully_loaded(&self) -> bool { self.frontier == ListPosition::END }

  /// The count callers should see: the known owners, or the server total
  /// while the list has not been walked to the end.
  pub fn visible_total_count(&self) -> i32 {
    let known = i32::try_from(self.ordered.len()).unwrap_or(i32::MAX);
    if self.is_fully_loaded() {
      known
    } else {
      known.max(self.server_total_count)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ids::OwnerId;

  #[test]
  fn restore_clamps_negative_total() {
    let list = StoryList::restore(SavedStoryList {
      state:       "abc".into(),
      total_count: -5,
      has_more:    true,
    });
    assert_eq!(list.server_total_count, 0);
    assert!(list.database_has_more);
    assert_eq!(list.saved().state, "abc");
  }

  #[test]
  fn visible_count_trusts_server_until_fully_loaded() {
    let mut list = StoryList { server_total_count: 10, ..StoryList::default() };
    list.ordered.insert(ListPosition::new(5, OwnerId(1)));
    assert_eq!(list.visible_total_count(), 10);

    list.frontier = ListPosition::END;
    assert_eq!(list.visible_total_count(), 1);
  }
}

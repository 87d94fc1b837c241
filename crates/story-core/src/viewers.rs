//! Story viewer lists.

use serde::{Deserialize, Serialize};

use crate::ids::OwnerId;

/// One view of a story. Lists are ordered newest first; a viewer doubles as
/// the pagination offset of the page that follows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoryViewer {
  pub viewer: OwnerId,
  pub date:   i32,
}

impl StoryViewer {
  pub fn new(viewer: OwnerId, date: i32) -> Self { Self { viewer, date } }

  /// The empty offset requests the first page.
  pub fn is_empty(&self) -> bool { self.viewer.0 == 0 && self.date == 0 }
}

/// A window of viewers assembled from consecutive pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerList(pub Vec<StoryViewer>);

impl ViewerList {
  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn viewer_ids(&self) -> Vec<OwnerId> {
    self.0.iter().map(|v| v.viewer).collect()
  }

  /// Up to `limit` viewers following `offset`. An offset that is not in the
  /// window yields an empty list.
  pub fn get_sublist(&self, offset: StoryViewer, limit: usize) -> ViewerList {
    let start = if offset.is_empty() {
      0
    } else {
      match self.0.iter().position(|v| *v == offset) {
        Some(index) => index + 1,
        None => return ViewerList::default(),
      }
    };
    ViewerList(self.0.iter().skip(start).take(limit).copied().collect())
  }

  /// Merge a page fetched after `offset` into the window.
  ///
  /// A first page replaces the head of the window and keeps the cached tail
  /// when the two overlap. A later page is appended only when it continues
  /// the window; otherwise it is dropped.
  pub fn add_sublist(&mut self, offset: StoryViewer, sublist: &ViewerList) {
    if sublist.is_empty() {
      return;
    }
    if offset.is_empty() {
      let Some(last) = sublist.0.last() else { return };
      let tail = match self.0.iter().position(|v| v == last) {
        Some(index) => self.0.split_off(index + 1),
        None => Vec::new(),
      };
      self.0 = sublist.0.clone();
      self.0.extend(tail);
      return;
    }
    if self.0.last() == Some(&offset) {
      self.0.extend(sublist.0.iter().copied());
    }
  }
}

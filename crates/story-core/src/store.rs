//! The persistence traits: a keyed story database and the intent log.
//!
//! The traits are implemented by storage backends (e.g. `story-store-sqlite`).
//! The manager depends on these abstractions, not on any concrete backend.
//! Records are opaque serialised bytes; parsing and validation belong to the
//! manager.

use std::future::Future;

use crate::{
  active::ListPosition,
  ids::{LogEventId, OwnerId, StoryKey, StoryListId},
  intent::{Intent, IntentRecord},
};

// ─── Row types ───────────────────────────────────────────────────────────────

/// A serialised story with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStory {
  pub key:  StoryKey,
  pub data: Vec<u8>,
}

/// A page of owners with active stories in a list, in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveListPage {
  pub owners: Vec<(OwnerId, Vec<u8>)>,
  /// Position of the last returned owner; the cursor for the next page.
  pub next:   ListPosition,
}

// ─── Story database ──────────────────────────────────────────────────────────

pub trait StoryDatabase: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Stories ───────────────────────────────────────────────────────────

  fn get_story(
    &self,
    key: StoryKey,
  ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send + '_;

  /// Insert or replace a story. A non-zero `expires_at` schedules the
  /// record for removal once it has expired.
  fn put_story(
    &self,
    key: StoryKey,
    expires_at: i32,
    data: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_story(
    &self,
    key: StoryKey,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Stories whose `expires_at` is set and not after `before`, soonest
  /// first.
  fn get_expiring_stories(
    &self,
    before: i32,
    limit: u32,
  ) -> impl Future<Output = Result<Vec<StoredStory>, Self::Error>> + Send + '_;

  // ── Active stories ────────────────────────────────────────────────────

  fn get_active_stories(
    &self,
    owner: OwnerId,
  ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send + '_;

  /// Insert or replace an owner's active stories. Owners outside every list
  /// are stored with `list = None` and never paged.
  fn put_active_stories(
    &self,
    owner: OwnerId,
    list: Option<StoryListId>,
    order: i64,
    data: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_active_stories(
    &self,
    owner: OwnerId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Up to `limit` owners of `list` positioned strictly after `after`.
  fn get_active_story_list_page(
    &self,
    list: StoryListId,
    after: ListPosition,
    limit: u32,
  ) -> impl Future<Output = Result<ActiveListPage, Self::Error>> + Send + '_;

  // ── List state ────────────────────────────────────────────────────────

  fn get_story_list_state(
    &self,
    list: StoryListId,
  ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send + '_;

  fn put_story_list_state(
    &self,
    list: StoryListId,
    data: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Intent log ──────────────────────────────────────────────────────────────

/// Append-only durable record of in-flight intents.
pub trait IntentLog: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn append(
    &self,
    intent: Intent,
  ) -> impl Future<Output = Result<LogEventId, Self::Error>> + Send + '_;

  /// Atomically replace record `id`; returns the id of the new record.
  fn rewrite(
    &self,
    id: LogEventId,
    intent: Intent,
  ) -> impl Future<Output = Result<LogEventId, Self::Error>> + Send + '_;

  fn erase(
    &self,
    id: LogEventId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Every live record in append order.
  fn replay_all(
    &self,
  ) -> impl Future<Output = Result<Vec<IntentRecord>, Self::Error>> + Send + '_;
}

//! Reloads of single stories and pages of stories by id.
//!
//! Reloads of one key are coalesced: the first waiter sends the request and
//! every later waiter joins it. A background reload (no waiter) never joins
//! a queue that already has one, since that request answers it anyway.

use std::collections::BTreeSet;

use story_core::{
  ids::{OwnerId, StoryId, StoryKey},
  remote::{RemoteError, RemoteStory, StoriesPage},
  update::{StoriesView, StoryView},
};

use super::{StoryManager, StoryRemote, StoryStore};
use crate::{Error, Result, event::Event, promise::Promise};

/// Someone waiting on a story reload.
#[derive(Debug)]
pub(super) enum ReloadWaiter {
  /// A background refresh nobody waits on.
  None,
  Done(Promise<()>),
  /// A `get_story` that answers with the reloaded view.
  Story(Promise<Option<StoryView>>),
}

impl ReloadWaiter {
  fn is_none(&self) -> bool {
    match self {
      Self::None => true,
      Self::Done(promise) => promise.is_none(),
      Self::Story(promise) => promise.is_none(),
    }
  }

  pub fn fail(self, err: Error) {
    match self {
      Self::None => {}
      Self::Done(promise) => promise.fail(err),
      Self::Story(promise) => promise.fail(err),
    }
  }
}

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  /// Refetch one story from the server.
  pub(super) fn reload_story(&mut self, key: StoryKey, waiter: ReloadWaiter) {
    if self.deleted.contains(&key) || self.is_inaccessible(key) {
      return self.finish_reload(key, waiter, Ok(()));
    }
    if !key.story_id.is_server() {
      return waiter.fail(Error::validation("Invalid story identifier"));
    }

    let waiters = self.reload_waiters.entry(key).or_default();
    if !waiters.is_empty() && waiter.is_none() {
      return;
    }
    waiters.push(waiter);
    if waiters.len() != 1 {
      tracing::debug!(%key, "joining story reload in flight");
      return;
    }

    tracing::debug!(%key, "reloading story");
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.get_stories_by_id(key.owner, vec![key.story_id]).await;
      Event::StoriesReloaded { owner: key.owner, story_ids: vec![key.story_id], result }
    });
  }

  fn finish_reload(&mut self, key: StoryKey, waiter: ReloadWaiter, result: Result<()>) {
    match (waiter, result) {
      (ReloadWaiter::None, _) => {}
      (ReloadWaiter::Done(promise), result) => promise.resolve(result),
      (ReloadWaiter::Story(promise), Ok(())) => {
        let view = self.surface(key);
        promise.ok(view);
      }
      (ReloadWaiter::Story(promise), Err(err)) => promise.fail(err),
    }
  }

  pub(super) async fn on_stories_reloaded(
    &mut self,
    owner: OwnerId,
    story_ids: Vec<StoryId>,
    result: Result<StoriesPage, RemoteError>,
  ) {
    let keys: Vec<StoryKey> =
      story_ids.iter().map(|id| StoryKey::new(owner, *id)).collect();
    let outcome = match result {
      Ok(page) => {
        self.on_get_stories(owner, story_ids, page).await;
        Ok(())
      }
      Err(err) => {
        tracing::info!(%owner, error = %err, "failed to reload stories");
        Err(Error::Remote(err))
      }
    };

    for key in keys {
      for waiter in self.reload_waiters.remove(&key).unwrap_or_default() {
        self.finish_reload(key, waiter, outcome.clone());
      }
    }
  }

  /// Apply a page of stories of one owner. Ids that were asked for and not
  /// returned no longer exist. Returns the reconciled total and the ids of
  /// the usable stories in page order.
  pub(super) async fn on_get_stories(
    &mut self,
    owner: OwnerId,
    expected: Vec<StoryId>,
    page: StoriesPage,
  ) -> (i32, Vec<StoryId>) {
    let mut story_ids = Vec::with_capacity(page.stories.len());
    for story in page.stories {
      match story {
        RemoteStory::Deleted { id } => {
          self.on_delete_story(StoryKey::new(owner, id)).await;
        }
        RemoteStory::Skipped(info) => {
          tracing::error!(%owner, story_id = %info.story_id, "received a skipped story in a page");
        }
        RemoteStory::Full(full) => {
          if let Some(story_id) = self.on_get_new_story(owner, full).await {
            story_ids.push(story_id);
          }
        }
      }
    }

    let returned = i32::try_from(story_ids.len()).unwrap_or(i32::MAX);
    let mut total_count = page.total_count;
    if total_count < returned {
      tracing::error!(%owner, total_count, returned, "story page total is too small");
      total_count = returned;
    }

    if !expected.is_empty() {
      let mut missing: BTreeSet<StoryId> = expected.into_iter().collect();
      for story_id in &story_ids {
        if !missing.remove(story_id) {
          tracing::error!(%owner, %story_id, "received a story that was not asked for");
        }
      }
      for story_id in missing {
        tracing::info!(%owner, %story_id, "story is no longer available");
        self.on_delete_story(StoryKey::new(owner, story_id)).await;
      }
    }
    (total_count, story_ids)
  }

  // ─── Pinned and archived pages ───────────────────────────────────────────

  pub(super) fn get_pinned_stories(
    &mut self,
    owner: OwnerId,
    from: StoryId,
    limit: i32,
    reply: Promise<StoriesView>,
  ) {
    if let Err(err) = self.check_page_request(owner, from, limit) {
      return reply.fail(err);
    }
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.get_pinned_stories(owner, from, limit).await;
      Event::PageLoaded { owner, result, reply }
    });
  }

  pub(super) fn get_story_archive(
    &mut self,
    from: StoryId,
    limit: i32,
    reply: Promise<StoriesView>,
  ) {
    let owner = self.my_id();
    if let Err(err) = self.check_page_request(owner, from, limit) {
      return reply.fail(err);
    }
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.get_story_archive(from, limit).await;
      Event::PageLoaded { owner, result, reply }
    });
  }

  fn check_page_request(&self, owner: OwnerId, from: StoryId, limit: i32) -> Result<()> {
    if !self.remote.have_owner(owner) {
      return Err(Error::validation("Story sender not found"));
    }
    if limit <= 0 {
      return Err(Error::validation("Parameter limit must be positive"));
    }
    if !from.is_none() && !from.is_server() {
      return Err(Error::validation("Invalid value of parameter from_story_id specified"));
    }
    Ok(())
  }

  pub(super) async fn on_page_loaded(
    &mut self,
    owner: OwnerId,
    result: Result<StoriesPage, RemoteError>,
    reply: Promise<StoriesView>,
  ) {
    let page = match result {
      Ok(page) => page,
      Err(err) => return reply.fail(err.into()),
    };
    let (total_count, story_ids) = self.on_get_stories(owner, Vec::new(), page).await;
    let stories = story_ids
      .into_iter()
      .filter_map(|story_id| self.surface(StoryKey::new(owner, story_id)))
      .collect();
    reply.ok(StoriesView { total_count, stories });
  }
}

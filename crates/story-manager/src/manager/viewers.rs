//! Viewer lists, view counts and batched view increments.

use std::collections::BTreeSet;

use story_core::{
  ids::{OwnerId, StoryId, StoryKey},
  remote::{RemoteError, ViewersPage},
  story::InteractionInfo,
  update::ViewersView,
  viewers::{StoryViewer, ViewerList},
};

use super::{StoryManager, StoryRemote, StoryStore};
use crate::{Error, event::{Event, TimerKey}, promise::Promise};

/// The viewers of one owned story fetched so far.
#[derive(Debug, Default)]
pub(super) struct CachedViewers {
  pub total_count: i32,
  pub viewers:     ViewerList,
}

/// Story ids of one owner waiting to be reported as viewed.
#[derive(Debug, Default)]
pub(super) struct PendingViews {
  pub story_ids: BTreeSet<StoryId>,
  pub has_query: bool,
}

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  // ─── Viewer lists ────────────────────────────────────────────────────────

  pub(super) fn get_story_viewers(
    &mut self,
    story_id: StoryId,
    offset: StoryViewer,
    limit: i32,
    reply: Promise<ViewersView>,
  ) {
    let key = StoryKey::new(self.my_id(), story_id);
    let Some(story) = self.stories.get(&key) else {
      return reply.fail(Error::StoryNotFound);
    };
    let Ok(limit_len) = usize::try_from(limit) else {
      return reply.fail(Error::validation("Parameter limit must be positive"));
    };
    if limit_len == 0 {
      return reply.fail(Error::validation("Parameter limit must be positive"));
    }
    if !self.can_get_viewers(key, story) || story.interaction.view_count == 0 {
      return reply.ok(ViewersView::default());
    }

    if let Some(cached) = self.cached_viewers.get(&key)
      && (cached.total_count == story.interaction.view_count || !offset.is_empty())
    {
      let page = cached.viewers.get_sublist(offset, limit_len);
      if !page.is_empty() {
        tracing::debug!(%key, "serving story viewers from the cache");
        return reply.ok(ViewersView { total_count: cached.total_count, viewers: page.0 });
      }
    }

    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.get_story_viewers(story_id, offset, limit).await;
      Event::ViewersLoaded { key, offset, result, reply }
    });
  }

  pub(super) async fn on_viewers_loaded(
    &mut self,
    key: StoryKey,
    offset: StoryViewer,
    result: Result<ViewersPage, RemoteError>,
    reply: Promise<ViewersView>,
  ) {
    let page = match result {
      Ok(page) => page,
      Err(err) => return reply.fail(err.into()),
    };
    let Some(story) = self.stories.get_mut(&key) else {
      return reply.fail(Error::StoryNotFound);
    };

    let mut total_count = page.total_count;
    if total_count < 0 || usize::try_from(total_count).is_ok_and(|n| n < page.viewers.len()) {
      tracing::error!(%key, total_count, "viewer total is smaller than the page");
      total_count = i32::try_from(page.viewers.len()).unwrap_or(i32::MAX);
    }

    let mut is_changed = story.interaction.set_view_count(total_count);
    if offset.is_empty() {
      let recent: Vec<OwnerId> = page.viewers.viewer_ids().into_iter().take(3).collect();
      if story.interaction.recent_viewer_ids != recent {
        story.interaction.recent_viewer_ids = recent;
        is_changed = true;
      }
    }
    if is_changed {
      self.on_story_changed(key, true, true, false).await;
    }

    let cached = self.cached_viewers.entry(key).or_default();
    if total_count < cached.total_count {
      tracing::error!(%key, total_count, cached = cached.total_count, "viewer total decreased");
    } else {
      cached.total_count = total_count;
    }
    cached.viewers.add_sublist(offset, &page.viewers);

    reply.ok(ViewersView { total_count, viewers: page.viewers.0 });
  }

  // ─── View counts ─────────────────────────────────────────────────────────

  /// Poll view counts while owned stories are open.
  pub(super) fn schedule_interaction_update(&mut self) {
    if self.opened_owned.is_empty() || self.timers.is_armed(TimerKey::InteractionUpdate) {
      return;
    }
    let period = std::time::Duration::from_secs(self.config.interaction_info_update_period);
    self.timers.arm(TimerKey::InteractionUpdate, period);
  }

  pub(super) fn update_interaction_info(&mut self) {
    let story_ids: Vec<StoryId> = self
      .opened_owned
      .keys()
      .map(|key| key.story_id)
      .collect::<BTreeSet<_>>()
      .into_iter()
      .take(self.config.max_views_query)
      .collect();
    if story_ids.is_empty() {
      return;
    }
    self.load_story_views(story_ids);
  }

  fn load_story_views(&mut self, story_ids: Vec<StoryId>) {
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.get_story_views(story_ids.clone()).await;
      Event::InteractionLoaded { story_ids, result }
    });
  }

  pub(super) fn load_story_view(&mut self, story_id: StoryId) {
    self.load_story_views(vec![story_id]);
  }

  pub(super) async fn on_interaction_loaded(
    &mut self,
    story_ids: Vec<StoryId>,
    result: Result<Vec<InteractionInfo>, RemoteError>,
  ) {
    self.schedule_interaction_update();
    let infos = match result {
      Ok(infos) => infos,
      Err(err) => {
        tracing::info!(error = %err, "failed to load story view counts");
        return;
      }
    };
    if infos.len() != story_ids.len() {
      tracing::error!(expected = story_ids.len(), received = infos.len(), "view count mismatch");
    }

    let owner = self.my_id();
    for (story_id, info) in story_ids.into_iter().zip(infos) {
      let key = StoryKey::new(owner, story_id);
      let Some(story) = self.stories.get_mut(&key) else { continue };
      if story.content.is_none() || story.interaction == info {
        continue;
      }
      story.interaction = info;
      self.on_story_changed(key, true, true, false).await;
    }
  }

  /// A user replied to the story; refresh its counts unless they already
  /// include the user.
  pub(super) fn on_story_replied(&mut self, key: StoryKey, replier: OwnerId) {
    if !key.story_id.is_server() || !self.is_owned(key.owner) {
      return;
    }
    let Some(story) = self.stories.get(&key) else { return };
    if self.can_get_viewers(key, story)
      && story.interaction.definitely_lacks_viewer(replier)
    {
      self.load_story_view(key.story_id);
    }
  }

  // ─── View increments ─────────────────────────────────────────────────────

  pub(super) fn queue_story_view(&mut self, key: StoryKey) {
    let views = self.pending_views.entry(key.owner).or_default();
    views.story_ids.insert(key.story_id);
    if !views.has_query {
      self.increment_story_views(key.owner);
    }
  }

  fn increment_story_views(&mut self, owner: OwnerId) {
    let Some(views) = self.pending_views.get_mut(&owner) else { return };
    let mut batch = Vec::new();
    while batch.len() < self.config.max_viewed_stories_batch {
      let Some(story_id) = views.story_ids.pop_first() else { break };
      batch.push(story_id);
    }
    if batch.is_empty() {
      self.pending_views.remove(&owner);
      return;
    }
    views.has_query = true;

    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.increment_story_views(owner, batch).await;
      Event::ViewsIncremented { owner, result }
    });
  }

  pub(super) fn on_views_incremented(&mut self, owner: OwnerId, result: Result<(), RemoteError>) {
    if let Err(err) = result {
      tracing::info!(%owner, error = %err, "failed to increment story views");
    }
    let Some(views) = self.pending_views.get_mut(&owner) else { return };
    views.has_query = false;
    if views.story_ids.is_empty() {
      self.pending_views.remove(&owner);
    } else {
      self.increment_story_views(owner);
    }
  }
}

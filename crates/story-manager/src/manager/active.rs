//! Per-owner active stories: membership, order, read watermarks and the
//! fetch of one owner's expiring stories.

use story_core::{
  active::{ActiveStories, ListPosition, OrderBits, SavedActiveStories, private_order},
  ids::{LogEventId, OwnerId, StoryId, StoryKey, StoryListId},
  intent::Intent,
  remote::{OwnerStories, RemoteError, RemoteStory},
  update::{ActiveStoriesView, Update},
};

use super::{StoryManager, StoryRemote, StoryStore};
use crate::{Error, event::Event, promise::Promise};

/// A fetch of one owner's active stories, with everyone waiting on it.
#[derive(Debug, Default)]
pub(super) struct ExpiringLoad {
  pub log_event_id: Option<LogEventId>,
  pub waiters:      Vec<Promise<ActiveStoriesView>>,
}

/// What recomputing an owner's order changed.
#[derive(Debug, Clone, Copy, Default)]
struct OrderChange {
  /// The public order or the list changed; callers must hear about it.
  notify:    bool,
  /// The private order or the list changed; the database row is stale.
  need_save: bool,
}

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  // ─── Membership ──────────────────────────────────────────────────────────

  /// Owners whose stories this client follows.
  pub(super) fn is_subscribed(&self, owner: OwnerId) -> bool {
    owner == self.config.changelog_owner_id
      || self.is_owned(owner)
      || self.remote.is_contact(owner)
  }

  /// The list an owner's stories belong in, if any.
  pub(super) fn owner_list(&self, owner: OwnerId) -> Option<StoryListId> {
    if !self.is_subscribed(owner) {
      return None;
    }
    if !self.is_owned(owner) && self.remote.are_stories_hidden(owner) {
      Some(StoryListId::Archive)
    } else {
      Some(StoryListId::Main)
    }
  }

  pub(super) fn active_stories_view(&self, owner: OwnerId) -> Option<ActiveStoriesView> {
    let active = self.active.get(&owner)?;
    let stories = active
      .story_ids
      .iter()
      .filter_map(|story_id| {
        self
          .stories
          .get(&StoryKey::new(owner, *story_id))
          .map(|story| story.info(*story_id))
      })
      .collect();
    Some(ActiveStoriesView {
      owner,
      list: active.list,
      order: active.public_order,
      max_read_story_id: active.max_read_story_id,
      stories,
    })
  }

  fn empty_active_stories_view(owner: OwnerId) -> ActiveStoriesView {
    ActiveStoriesView {
      owner,
      list: None,
      order: 0,
      max_read_story_id: StoryId::NONE,
      stories: Vec::new(),
    }
  }

  fn send_active_stories_update(&self, owner: OwnerId) {
    let view = self
      .active_stories_view(owner)
      .unwrap_or_else(|| Self::empty_active_stories_view(owner));
    self.emit(Update::ChatActiveStories(view));
  }

  // ─── Order ───────────────────────────────────────────────────────────────

  /// Recompute an owner's private and public order and move it between the
  /// lists as needed.
  fn update_active_order(&mut self, owner: OwnerId) -> OrderChange {
    let Some(active) = self.active.get(&owner) else {
      return OrderChange::default();
    };
    let Some(last_story_id) = active.last_story_id() else {
      return OrderChange::default();
    };
    let last_date = self
      .stories
      .get(&StoryKey::new(owner, last_story_id))
      .map_or(0, |story| story.date);
    let bits = OrderBits {
      is_premium:   self.remote.is_premium(owner),
      is_changelog: owner == self.config.changelog_owner_id,
      has_unread:   active.has_unread(),
      is_self:      self.is_owned(owner),
    };
    let new_private = private_order(last_date, bits);
    let new_list = self.owner_list(owner);
    let old_private = active.private_order;
    let old_public = active.public_order;
    let old_list = active.list;

    let position_moved = old_private != new_private || old_list != new_list;
    let mut new_public = 0;
    if let Some(list) = new_list {
      let position = ListPosition::new(new_private, owner);
      if position <= self.lists[list.index()].frontier {
        new_public = new_private;
      }
      if position_moved {
        if let Some(old) = old_list {
          self.lists[old.index()]
            .ordered
            .remove(&ListPosition::new(old_private, owner));
        }
        self.lists[list.index()].ordered.insert(position);
        if let Some(old) = old_list
          && old != list
        {
          self.update_list_count(old);
        }
        self.update_list_count(list);
      }
    } else if let Some(old) = old_list {
      self.lists[old.index()]
        .ordered
        .remove(&ListPosition::new(old_private, owner));
      self.update_list_count(old);
    }

    let mut change = OrderChange { notify: false, need_save: position_moved };
    if !position_moved && old_public == new_public {
      return change;
    }
    if let Some(active) = self.active.get_mut(&owner) {
      active.private_order = new_private;
    }
    if old_public != new_public || old_list != new_list {
      if old_list != new_list && old_list.is_some() && old_public != 0 {
        // Leave the old list before showing up in the new one.
        if let Some(active) = self.active.get_mut(&owner) {
          active.public_order = 0;
        }
        self.send_active_stories_update(owner);
      }
      if let Some(active) = self.active.get_mut(&owner) {
        active.list = new_list;
        active.public_order = new_public;
      }
      change.notify = true;
    }
    change
  }

  /// Recompute the order after something it depends on changed.
  pub(super) async fn on_owner_order_updated(&mut self, owner: OwnerId) {
    if !self.active.contains_key(&owner) {
      return;
    }
    let change = self.update_active_order(owner);
    if change.notify {
      self.send_active_stories_update(owner);
    }
    if change.need_save {
      self.save_active_stories(owner).await;
    }
  }

  // ─── Updates ─────────────────────────────────────────────────────────────

  /// Replace an owner's active story ids and read watermark.
  ///
  /// Ids that are not server ids of active cached stories are dropped. An
  /// empty result removes the owner from its list.
  pub(super) async fn on_update_active_stories(
    &mut self,
    owner: OwnerId,
    mut max_read_story_id: StoryId,
    mut story_ids: Vec<StoryId>,
    mut from_database: bool,
  ) {
    let before = story_ids.len();
    story_ids.retain(|story_id| {
      story_id.is_server() && self.is_active_story(StoryKey::new(owner, *story_id))
    });
    if story_ids.len() != before {
      // The stored copy is stale now.
      from_database = false;
    }
    if story_ids.first().is_none_or(|first| max_read_story_id.0 < first.0) {
      max_read_story_id = StoryId::NONE;
    }

    if story_ids.is_empty() {
      if let Some(active) = self.active.remove(&owner) {
        if let Some(list_id) = active.list {
          let list = &mut self.lists[list_id.index()];
          list.ordered.remove(&active.position(owner));
          let known = i32::try_from(list.ordered.len()).unwrap_or(i32::MAX);
          if !from_database && list.server_total_reloaded && list.server_total_count > known {
            list.server_total_count -= 1;
            self.save_story_list(list_id).await;
          }
          self.update_list_count(list_id);
        }
        self.send_active_stories_update(owner);
      } else {
        self.max_read_story_ids.remove(&owner);
      }
      if !from_database {
        self.save_active_stories(owner).await;
      }
      self.failed_to_load_active.insert(owner);
      return;
    }

    self.failed_to_load_active.remove(&owner);
    if !self.active.contains_key(&owner) {
      if let Some(remembered) = self.max_read_story_ids.remove(&owner)
        && remembered > max_read_story_id
        && remembered >= story_ids[0]
      {
        max_read_story_id = remembered;
      }
      self.active.insert(owner, ActiveStories::default());
    }

    let Some(active) = self.active.get_mut(&owner) else { return };
    let mut need_save = false;
    if active.max_read_story_id != max_read_story_id || active.story_ids != story_ids {
      active.max_read_story_id = max_read_story_id;
      active.story_ids = story_ids;
      need_save = true;
      self.update_active_order(owner);
      self.send_active_stories_update(owner);
    } else {
      let change = self.update_active_order(owner);
      need_save = change.need_save;
      if change.notify {
        self.send_active_stories_update(owner);
      }
    }

    if need_save && !from_database {
      self.save_active_stories(owner).await;
    }
  }

  /// Apply what the server reported for one owner. `expected` is the owner
  /// that was asked about, if any. Returns the owner the record belongs to.
  pub(super) async fn on_get_owner_stories(
    &mut self,
    expected: Option<OwnerId>,
    stories: Option<OwnerStories>,
  ) -> Option<OwnerId> {
    let Some(stories) = stories else {
      if let Some(owner) = expected {
        self
          .on_update_active_stories(owner, StoryId::NONE, Vec::new(), false)
          .await;
      }
      return expected;
    };
    let owner = stories.owner;
    if expected.is_some_and(|expected| expected != owner) || !owner.is_valid() {
      tracing::error!(?expected, %owner, "received stories of an unexpected owner");
      if let Some(expected) = expected {
        self
          .on_update_active_stories(expected, StoryId::NONE, Vec::new(), false)
          .await;
      }
      return expected;
    }

    let mut max_read_story_id = stories.max_read_story_id;
    if !max_read_story_id.is_server() && !max_read_story_id.is_none() {
      tracing::error!(%owner, %max_read_story_id, "received an invalid read watermark");
      max_read_story_id = StoryId::NONE;
    }

    let mut story_ids = Vec::with_capacity(stories.stories.len());
    for story in stories.stories {
      match story {
        RemoteStory::Deleted { id } => {
          self.on_delete_story(StoryKey::new(owner, id)).await;
        }
        RemoteStory::Skipped(info) => {
          if let Some(story_id) = self.on_get_story_info(owner, info).await {
            story_ids.push(story_id);
          }
        }
        RemoteStory::Full(full) => {
          if let Some(story_id) = self.on_get_new_story(owner, full).await {
            story_ids.push(story_id);
          }
        }
      }
    }
    self
      .on_update_active_stories(owner, max_read_story_id, story_ids, false)
      .await;
    Some(owner)
  }

  // ─── Persistence ─────────────────────────────────────────────────────────

  /// Make sure the owner's active stories are in memory, reading them from
  /// the database if needed. Returns whether they are.
  pub(super) async fn get_active_stories_force(&mut self, owner: OwnerId) -> bool {
    if self.active.contains_key(&owner) {
      return true;
    }
    if !self.config.use_database
      || self.failed_to_load_active.contains(&owner)
      || !owner.is_valid()
    {
      return false;
    }
    match self.store.get_active_stories(owner).await {
      Ok(data) => self.on_get_active_stories_from_database(None, owner, data).await,
      Err(err) => {
        tracing::error!(%owner, error = %err, "failed to read active stories");
        self.failed_to_load_active.insert(owner);
        false
      }
    }
  }

  pub(super) async fn on_get_active_stories_from_database(
    &mut self,
    list: Option<StoryListId>,
    owner: OwnerId,
    data: Option<Vec<u8>>,
  ) -> bool {
    if self.active.contains_key(&owner) {
      return true;
    }
    let Some(data) = data else {
      self.failed_to_load_active.insert(owner);
      return false;
    };
    let saved: SavedActiveStories = match serde_json::from_slice(&data) {
      Ok(saved) => saved,
      Err(err) => {
        tracing::error!(%owner, error = %err, "corrupt active stories record");
        self.save_active_stories(owner).await;
        self.failed_to_load_active.insert(owner);
        return false;
      }
    };

    let mut story_ids = Vec::with_capacity(saved.stories.len());
    for info in saved.stories {
      if let Some(story_id) = self.on_get_story_info(owner, info).await {
        story_ids.push(story_id);
      }
    }
    self
      .on_update_active_stories(owner, saved.max_read_story_id, story_ids, true)
      .await;

    if self.active.contains_key(&owner) {
      return true;
    }
    // The stored owner had nothing left; the server total counted it.
    if let Some(list_id) = list.or_else(|| self.owner_list(owner)) {
      let list = &mut self.lists[list_id.index()];
      let known = i32::try_from(list.ordered.len()).unwrap_or(i32::MAX);
      if !list.server_total_reloaded && list.server_total_count > known {
        list.server_total_count -= 1;
        self.update_list_count(list_id);
        self.save_story_list(list_id).await;
      }
    }
    false
  }

  /// Write the owner's active stories, or delete the row when there are
  /// none.
  async fn save_active_stories(&self, owner: OwnerId) {
    if !self.config.use_database {
      return;
    }
    let Some(active) = self.active.get(&owner) else {
      if let Err(err) = self.store.delete_active_stories(owner).await {
        tracing::error!(%owner, error = %err, "failed to delete active stories");
      }
      return;
    };
    let saved = SavedActiveStories {
      max_read_story_id: active.max_read_story_id,
      stories:           active
        .story_ids
        .iter()
        .filter_map(|story_id| {
          self
            .stories
            .get(&StoryKey::new(owner, *story_id))
            .map(|story| story.info(*story_id))
        })
        .collect(),
    };
    let data = match serde_json::to_vec(&saved) {
      Ok(data) => data,
      Err(err) => {
        tracing::error!(%owner, error = %err, "failed to serialize active stories");
        return;
      }
    };
    if let Err(err) = self
      .store
      .put_active_stories(owner, active.list, active.private_order, data)
      .await
    {
      tracing::error!(%owner, error = %err, "failed to save active stories");
    }
  }

  // ─── Read watermarks ─────────────────────────────────────────────────────

  /// Advance the owner's read watermark. Returns `true` if it moved.
  pub(super) async fn on_update_read_stories(
    &mut self,
    owner: OwnerId,
    max_read_story_id: StoryId,
  ) -> bool {
    if !self.remote.have_owner(owner) {
      return false;
    }
    if self.get_active_stories_force(owner).await {
      let Some(active) = self.active.get(&owner) else { return false };
      if max_read_story_id <= active.max_read_story_id {
        return false;
      }
      let story_ids = active.story_ids.clone();
      self
        .on_update_active_stories(owner, max_read_story_id, story_ids, false)
        .await;
      return true;
    }

    let remembered = self
      .max_read_story_ids
      .get(&owner)
      .copied()
      .unwrap_or(StoryId::NONE);
    if max_read_story_id > remembered {
      self.max_read_story_ids.insert(owner, max_read_story_id);
      return true;
    }
    false
  }

  /// Tell the server how far the owner's stories were read.
  pub(super) async fn read_stories_on_server(
    &mut self,
    owner: OwnerId,
    max_story_id: StoryId,
    log_event_id: Option<LogEventId>,
  ) {
    let log_event_id = match log_event_id {
      Some(id) => Some(id),
      None => self.append_intent(Intent::ReadOnServer { owner, max_story_id }).await,
    };
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.read_stories(owner, max_story_id).await;
      Event::ReadDone { owner, log_event_id, result }
    });
  }

  pub(super) async fn on_read_done(
    &mut self,
    owner: OwnerId,
    log_event_id: Option<LogEventId>,
    result: Result<(), RemoteError>,
  ) {
    if let Err(err) = result {
      tracing::info!(%owner, error = %err, "failed to mark stories as read");
    }
    self.erase_intent(log_event_id).await;
  }

  // ─── Owner fetch ─────────────────────────────────────────────────────────

  pub(super) async fn get_owner_expiring_stories(
    &mut self,
    owner: OwnerId,
    reply: Promise<ActiveStoriesView>,
  ) {
    if !self.remote.have_owner(owner) {
      return reply.fail(Error::validation("Story sender not found"));
    }
    if self.get_active_stories_force(owner).await {
      let view = self
        .active_stories_view(owner)
        .unwrap_or_else(|| Self::empty_active_stories_view(owner));
      reply.ok(view);
      // Answered from the cache; refresh in the background.
      self.load_owner_expiring(owner, None, None).await;
    } else {
      self.load_owner_expiring(owner, None, Some(reply)).await;
    }
  }

  /// Fetch one owner's active stories, joining a fetch in flight.
  pub(super) async fn load_owner_expiring(
    &mut self,
    owner: OwnerId,
    log_event_id: Option<LogEventId>,
    waiter: Option<Promise<ActiveStoriesView>>,
  ) {
    if let Some(load) = self.expiring_loads.get_mut(&owner) {
      load.waiters.extend(waiter);
      if log_event_id.is_some() {
        // A replayed duplicate of the fetch already running.
        self.erase_intent(log_event_id).await;
      }
      return;
    }

    let log_event_id = match log_event_id {
      Some(id) => Some(id),
      None => self.append_intent(Intent::LoadExpiring { owner }).await,
    };
    self.expiring_loads.insert(owner, ExpiringLoad {
      log_event_id,
      waiters: waiter.into_iter().collect(),
    });

    tracing::debug!(%owner, "loading active stories of owner");
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.get_owner_stories(owner).await;
      Event::ExpiringLoaded { owner, result }
    });
  }

  pub(super) async fn on_expiring_loaded(
    &mut self,
    owner: OwnerId,
    result: Result<Option<OwnerStories>, RemoteError>,
  ) {
    // The load stays registered while its stories are merged, so that the
    // merge joins it instead of starting another one.
    let outcome = match result {
      Ok(stories) => {
        self.on_get_owner_stories(Some(owner), stories).await;
        Ok(
          self
            .active_stories_view(owner)
            .unwrap_or_else(|| Self::empty_active_stories_view(owner)),
        )
      }
      Err(err) => {
        tracing::info!(%owner, error = %err, "failed to load active stories of owner");
        Err(err.into())
      }
    };
    let load = self.expiring_loads.remove(&owner).unwrap_or_default();
    self.erase_intent(load.log_event_id).await;
    Promise::resolve_all(load.waiters, outcome);
  }

  // ─── Hidden owners ───────────────────────────────────────────────────────

  pub(super) fn toggle_owner_hidden(&mut self, owner: OwnerId, hidden: bool, reply: Promise<()>) {
    if !self.remote.have_owner(owner) {
      return reply.fail(Error::validation("Story sender not found"));
    }
    if self.is_owned(owner) || owner == self.config.changelog_owner_id {
      return reply.fail(Error::validation("Can't archive stories of the owner"));
    }
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.toggle_owner_hidden(owner, hidden).await;
      Event::OwnerHiddenToggled { owner, hidden, result, reply }
    });
  }

  pub(super) async fn on_owner_hidden_toggled(
    &mut self,
    owner: OwnerId,
    hidden: bool,
    result: Result<(), RemoteError>,
    reply: Promise<()>,
  ) {
    if let Err(err) = result {
      return reply.fail(err.into());
    }
    self.remote.set_stories_hidden(owner, hidden);
    self.on_owner_order_updated(owner).await;
    reply.ok(());
  }
}

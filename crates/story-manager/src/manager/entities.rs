//! The entity store: stories in memory, backed by the database, refreshed
//! from the network.
//!
//! Resolution goes memory → database → network. A record received from the
//! server is merged field by field into the cached story so that an edit in
//! flight is not clobbered. Loads that failed are remembered until the story
//! is seen again, which keeps futile database reads from repeating.

use story_core::{
  ids::{GlobalId, OwnerId, StoryId, StoryKey},
  remote::{FullStory, RemoteStory},
  story::{Story, StoryInfo, clamp_dates},
  update::{StoryView, Update},
};

use super::{StoryManager, StoryRemote, StoryStore, reload::ReloadWaiter, timers::until};
use crate::{Error, event::TimerKey, promise::Promise};

/// At most this many recent viewers are shown on a story.
const MAX_RECENT_VIEWERS: usize = 3;

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  // ─── Lookups ─────────────────────────────────────────────────────────────

  pub(super) fn is_active_story(&self, key: StoryKey) -> bool {
    let now = self.now();
    self.stories.get(&key).is_some_and(|story| story.is_active(now))
  }

  pub(super) fn is_inaccessible(&self, key: StoryKey) -> bool {
    self
      .inaccessible
      .get(&key)
      .is_some_and(|at| *at > self.now() - self.config.inaccessible_window())
  }

  pub(super) fn can_get_viewers(&self, key: StoryKey, story: &Story) -> bool {
    self.is_owned(key.owner)
      && key.story_id.is_server()
      && self.now()
        < story.viewers_expire_date(self.config.story_viewers_expiration_delay)
  }

  pub(super) fn story_by_global_id(&self, global_id: GlobalId) -> Option<StoryKey> {
    self.stories_by_global_id.get(&global_id).copied()
  }

  fn register_story(&mut self, key: StoryKey) {
    self.max_global_id += 1;
    let global_id = GlobalId(self.max_global_id);
    if let Some(story) = self.stories.get_mut(&key) {
      story.global_id = global_id;
      self.stories_by_global_id.insert(global_id, key);
    }
  }

  /// Put `story` in the cache, replacing whatever was cached under `key`.
  fn insert_story(&mut self, key: StoryKey, story: Story) {
    if let Some(old) = self.stories.insert(key, story)
      && old.global_id.is_registered()
    {
      self.stories_by_global_id.remove(&old.global_id);
      self.timers.cancel_story(old.global_id);
    }
    self.register_story(key);
  }

  // ─── Views ───────────────────────────────────────────────────────────────

  /// The caller-facing form of a story. Placeholders have none. An edit in
  /// flight shows its content and caption in place of the cached ones.
  pub(super) fn view_of(&self, key: StoryKey, story: &Story) -> Option<StoryView> {
    let content = story.content.as_ref()?;
    let edit = self.being_edited.get(&key).map(|edit| &edit.shadow);
    let content = edit
      .and_then(|shadow| shadow.content.clone())
      .unwrap_or_else(|| content.clone());
    let caption = match edit {
      Some(shadow) if shadow.edit_caption => shadow.caption.clone(),
      _ => story.caption.clone(),
    };

    let is_owned = self.is_owned(key.owner);
    let can_get_viewers = self.can_get_viewers(key, story);
    let mut interaction = if is_owned {
      story.interaction.clone()
    } else {
      Default::default()
    };
    interaction.recent_viewer_ids.truncate(MAX_RECENT_VIEWERS);

    Some(StoryView {
      key,
      date: story.date,
      is_being_edited: edit.is_some(),
      is_edited: story.is_edited,
      is_pinned: story.is_pinned,
      is_visible_only_for_self: !story.is_public
        && !story.is_for_close_friends
        && !story.is_for_contacts
        && !story.is_for_selected_contacts,
      can_be_forwarded: !story.noforwards,
      can_be_replied: !is_owned && key.owner != self.config.changelog_owner_id,
      can_get_viewers,
      has_expired_viewers: is_owned
        && key.story_id.is_server()
        && !can_get_viewers
        && story.interaction.view_count > 0,
      interaction,
      privacy: story.privacy.setting(),
      content,
      caption,
    })
  }

  /// The view of a cached story, recording that callers have seen it.
  pub(super) fn surface(&mut self, key: StoryKey) -> Option<StoryView> {
    let view = self.view_of(key, self.stories.get(&key)?)?;
    if let Some(story) = self.stories.get_mut(&key) {
      story.update_sent = true;
    }
    Some(view)
  }

  pub(super) fn send_story_update(&mut self, key: StoryKey) {
    if let Some(view) = self.surface(key) {
      self.emit(Update::Story(Box::new(view)));
    }
  }

  // ─── Commands ────────────────────────────────────────────────────────────

  pub(super) async fn get_story(
    &mut self,
    key: StoryKey,
    only_local: bool,
    reply: Promise<Option<StoryView>>,
  ) {
    if !self.remote.have_owner(key.owner) {
      return reply.fail(Error::validation("Story sender not found"));
    }
    if !key.story_id.is_server() {
      return reply.fail(Error::validation("Invalid story identifier specified"));
    }
    if self.get_story_force(key).await {
      let view = self.surface(key);
      return reply.ok(view);
    }
    if only_local {
      return reply.ok(None);
    }
    self.reload_story(key, ReloadWaiter::Story(reply));
  }

  /// A story pushed by the server.
  pub(super) async fn apply_story(&mut self, owner: OwnerId, story: RemoteStory) {
    if !owner.is_valid() {
      tracing::error!(%owner, "received a story of an invalid owner");
      return;
    }
    match story {
      RemoteStory::Full(full) => {
        self.on_get_new_story(owner, full).await;
      }
      RemoteStory::Skipped(info) => {
        self.on_get_story_info(owner, info).await;
      }
      RemoteStory::Deleted { id } => {
        self.on_delete_story(StoryKey::new(owner, id)).await;
      }
    }
  }

  // ─── Resolution ──────────────────────────────────────────────────────────

  /// Make sure the story is in memory with content, reading it from the
  /// database if needed. Returns whether it is.
  pub(super) async fn get_story_force(&mut self, key: StoryKey) -> bool {
    if !key.is_valid() {
      return false;
    }
    if self.stories.get(&key).is_some_and(|story| story.content.is_some()) {
      return true;
    }
    if !self.config.use_database
      || self.failed_to_load.contains(&key)
      || self.deleted.contains(&key)
      || self.is_inaccessible(key)
    {
      return false;
    }

    tracing::debug!(%key, "loading story from the database");
    match self.store.get_story(key).await {
      Ok(data) => self.on_get_story_from_database(key, data).await,
      Err(err) => {
        tracing::error!(%key, error = %err, "failed to read story");
        self.failed_to_load.insert(key);
        false
      }
    }
  }

  async fn on_get_story_from_database(&mut self, key: StoryKey, data: Option<Vec<u8>>) -> bool {
    if self.stories.get(&key).is_some_and(|story| story.content.is_some()) {
      return true;
    }
    let Some(data) = data else {
      self.failed_to_load.insert(key);
      return false;
    };
    let Some(story) = self.parse_story(key, &data).await else {
      self.failed_to_load.insert(key);
      return false;
    };
    if !self.remote.resolve(&story.dependencies()) {
      tracing::info!(%key, "story dependencies are unavailable; reloading");
      self.reload_story(key, ReloadWaiter::None);
      self.failed_to_load.insert(key);
      return false;
    }

    self.insert_story(key, story);
    self.on_story_changed(key, true, false, true).await;
    true
  }

  /// Decode a stored story and apply the retention rules. Records that
  /// must not be kept are deleted from the database.
  pub(super) async fn parse_story(&mut self, key: StoryKey, data: &[u8]) -> Option<Story> {
    let story: Story = match serde_json::from_slice(data) {
      Ok(story) => story,
      Err(err) => {
        tracing::error!(%key, error = %err, "corrupt story record");
        self.delete_story_from_database(key).await;
        self.reload_story(key, ReloadWaiter::None);
        return None;
      }
    };
    if story.content.is_none() {
      tracing::error!(%key, "stored story has no content");
      self.delete_story_from_database(key).await;
      return None;
    }

    let now = self.now();
    if story.is_active(now) {
      let listed = self
        .active
        .get(&key.owner)
        .is_none_or(|active| active.story_ids.contains(&key.story_id));
      if !listed {
        tracing::info!(%key, "stored story is no longer active");
        self.delete_story_files(&story);
        self.delete_story_from_database(key).await;
        return None;
      }
    } else if !self.is_owned(key.owner) && !story.is_pinned {
      tracing::info!(%key, "stored story has expired");
      self.delete_story_files(&story);
      self.delete_story_from_database(key).await;
      return None;
    }
    Some(story)
  }

  // ─── Merging received records ────────────────────────────────────────────

  /// Merge a full record from the server. Returns the story id when the
  /// record was usable.
  pub(super) async fn on_get_new_story(
    &mut self,
    owner: OwnerId,
    mut item: FullStory,
  ) -> Option<StoryId> {
    let story_id = item.id;
    if !story_id.is_server() {
      tracing::error!(%owner, %story_id, "received a story with an invalid id");
      return None;
    }
    let key = StoryKey::new(owner, story_id);
    if self.deleted.contains(&key) {
      return None;
    }
    let content = item.content.take()?;

    let mut is_changed = false;
    let mut need_save = false;
    if !self.get_story_force(key).await {
      self.insert_story(key, Story::default());
      self.inaccessible.remove(&key);
      self.failed_to_load.remove(&key);
      item.min = false;
      is_changed = true;
    }

    if !self.is_owned(owner) {
      item.min = false;
    }
    let (editing_content, editing_caption) = self
      .being_edited
      .get(&key)
      .map_or((false, false), |edit| {
        (edit.shadow.content.is_some(), edit.shadow.edit_caption)
      });
    let (date, expire_date, repaired) = clamp_dates(item.date, item.expire_date);
    if repaired {
      tracing::error!(
        %key,
        date = item.date,
        expire_date = item.expire_date,
        "received story with invalid dates"
      );
    }
    let now = self.now();

    let story = self.stories.get_mut(&key)?;
    story.receive_date = now;

    if editing_content {
      // The edit decides what is shown; keep the server copy for later.
      story.content = Some(content);
      need_save = true;
    } else if story.content.as_ref() != Some(&content) {
      story.content = Some(content);
      is_changed = true;
    }

    if story.date != date
      || story.expire_date != expire_date
      || story.is_edited != item.is_edited
      || story.is_pinned != item.is_pinned
      || story.is_public != item.is_public
      || story.is_for_close_friends != item.is_for_close_friends
      || story.is_for_contacts != item.is_for_contacts
      || story.is_for_selected_contacts != item.is_for_selected_contacts
      || story.noforwards != item.noforwards
    {
      story.date = date;
      story.expire_date = expire_date;
      story.is_edited = item.is_edited;
      story.is_pinned = item.is_pinned;
      story.is_public = item.is_public;
      story.is_for_close_friends = item.is_for_close_friends;
      story.is_for_contacts = item.is_for_contacts;
      story.is_for_selected_contacts = item.is_for_selected_contacts;
      story.noforwards = item.noforwards;
      is_changed = true;
    }

    if !item.min
      && (story.privacy != item.privacy || story.interaction != item.interaction)
    {
      story.privacy = item.privacy;
      story.interaction = item.interaction;
      is_changed = true;
    }

    if story.caption != item.caption {
      story.caption = item.caption;
      if editing_caption {
        need_save = true;
      } else {
        is_changed = true;
      }
    }

    self.on_story_changed(key, is_changed, need_save, false).await;

    if self.is_active_story(key) {
      if !self.get_active_stories_force(owner).await {
        if self.is_subscribed(owner) {
          self.load_owner_expiring(owner, None, None).await;
        }
      } else if let Some(active) = self.active.get(&owner)
        && !active.story_ids.contains(&story_id)
      {
        let mut story_ids = active.story_ids.clone();
        let max_read_story_id = active.max_read_story_id;
        let at = story_ids.partition_point(|id| *id < story_id);
        story_ids.insert(at, story_id);
        self
          .on_update_active_stories(owner, max_read_story_id, story_ids, false)
          .await;
      }
    }
    Some(story_id)
  }

  /// Merge a partial record. Unknown stories become placeholders.
  pub(super) async fn on_get_story_info(
    &mut self,
    owner: OwnerId,
    info: StoryInfo,
  ) -> Option<StoryId> {
    let story_id = info.story_id;
    if !story_id.is_server() {
      tracing::error!(%owner, %story_id, "received story info with an invalid id");
      return None;
    }
    let key = StoryKey::new(owner, story_id);
    if self.deleted.contains(&key) {
      return None;
    }

    if !self.stories.contains_key(&key) {
      self.insert_story(key, Story::default());
      self.inaccessible.remove(&key);
    }

    let (date, expire_date, repaired) = clamp_dates(info.date, info.expire_date);
    if repaired {
      tracing::error!(
        %key,
        date = info.date,
        expire_date = info.expire_date,
        "received story info with invalid dates"
      );
    }
    let story = self.stories.get_mut(&key)?;
    if story.date != date
      || story.expire_date != expire_date
      || story.is_for_close_friends != info.is_for_close_friends
    {
      story.date = date;
      story.expire_date = expire_date;
      story.is_for_close_friends = info.is_for_close_friends;
      self.on_story_changed(key, true, true, false).await;
    }
    Some(story_id)
  }

  // ─── Deletion ────────────────────────────────────────────────────────────

  /// The story is gone on the server: evict it everywhere.
  pub(super) async fn on_delete_story(&mut self, key: StoryKey) {
    if !key.story_id.is_server() {
      tracing::error!(%key, "deleting a story with an invalid id");
      return;
    }
    self.inaccessible.insert(key, self.now());

    let Some(story) = self.stories.remove(&key) else {
      self.delete_story_from_database(key).await;
      return;
    };
    tracing::debug!(%key, "deleting story");
    if story.update_sent {
      self.emit(Update::StoryDeleted(key));
    }
    self.delete_story_files(&story);
    if story.global_id.is_registered() {
      self.stories_by_global_id.remove(&story.global_id);
      self.timers.cancel_story(story.global_id);
    }

    if let Some(edit) = self.being_edited.remove(&key) {
      self.erase_intent(edit.shadow.log_event_id).await;
      Promise::resolve_all(edit.waiters, Err(Error::StoryNotFound));
    }
    self.edit_generations.remove(&key);
    self.cached_viewers.remove(&key);
    self.opened.remove(&key);

    if self.get_active_stories_force(key.owner).await
      && let Some(active) = self.active.get(&key.owner)
      && active.story_ids.contains(&key.story_id)
    {
      let max_read_story_id = active.max_read_story_id;
      let story_ids = active
        .story_ids
        .iter()
        .copied()
        .filter(|id| *id != key.story_id)
        .collect();
      self
        .on_update_active_stories(key.owner, max_read_story_id, story_ids, false)
        .await;
    }

    self.delete_story_from_database(key).await;
  }

  fn delete_story_files(&self, story: &Story) {
    if let Some(file) = story.file() {
      self.remote.delete_file(file);
    }
  }

  async fn delete_story_from_database(&self, key: StoryKey) {
    if !self.config.use_database {
      return;
    }
    if let Err(err) = self.store.delete_story(key).await {
      tracing::error!(%key, error = %err, "failed to delete story");
    }
  }

  // ─── Change propagation ──────────────────────────────────────────────────

  /// React to a change of a cached story: re-arm its timers, persist it
  /// unless the change came from the database, notify callers that have
  /// seen it and fan out to referencing contexts.
  pub(super) async fn on_story_changed(
    &mut self,
    key: StoryKey,
    is_changed: bool,
    need_save: bool,
    from_database: bool,
  ) {
    let now = self.now();
    let Some(story) = self.stories.get(&key) else { return };
    let global_id = story.global_id;
    let is_active = story.is_active(now);
    let expire_date = story.expire_date;
    let viewers_expire_date = self
      .can_get_viewers(key, story)
      .then(|| story.viewers_expire_date(self.config.story_viewers_expiration_delay));
    let has_content = story.content.is_some();
    let update_sent = story.update_sent;
    let is_pinned = story.is_pinned;

    if is_active {
      self.timers.arm(
        TimerKey::Expire(global_id),
        until(now, expire_date),
      );
    }
    if let Some(at) = viewers_expire_date {
      self
        .timers
        .arm(TimerKey::ViewersExpire(global_id), until(now, at));
    }

    if !has_content || !(is_changed || need_save) {
      return;
    }

    if self.config.use_database && !from_database {
      let expires_at = if is_active && !self.is_owned(key.owner) && !is_pinned {
        expire_date
      } else {
        0
      };
      self.save_story(key, expires_at).await;
    }

    if is_changed && update_sent {
      self.send_story_update(key);
    }
    if let Some(contexts) = self.references.get(&key) {
      for context in contexts {
        self.emit(Update::StoryReferenceChanged { context: *context, key });
      }
    }
  }

  async fn save_story(&self, key: StoryKey, expires_at: i32) {
    let Some(story) = self.stories.get(&key) else { return };
    let data = match serde_json::to_vec(story) {
      Ok(data) => data,
      Err(err) => {
        tracing::error!(%key, error = %err, "failed to serialize story");
        return;
      }
    };
    if let Err(err) = self.store.put_story(key, expires_at, data).await {
      tracing::error!(%key, error = %err, "failed to save story");
    }
  }

  // ─── Expiry ──────────────────────────────────────────────────────────────

  pub(super) async fn on_story_expire_timeout(&mut self, global_id: GlobalId) {
    let Some(key) = self.story_by_global_id(global_id) else { return };
    let Some(story) = self.stories.get(&key) else { return };
    if story.is_active(self.now()) {
      // Woken early; arm again for the real expiry.
      self.on_story_changed(key, false, false, false).await;
      return;
    }

    let evict =
      !self.is_owned(key.owner) && story.content.is_some() && !story.is_pinned;
    if evict {
      tracing::debug!(%key, "story expired");
      self.on_delete_story(key).await;
    }

    if let Some(active) = self.active.get(&key.owner)
      && active.story_ids.contains(&key.story_id)
    {
      let max_read_story_id = active.max_read_story_id;
      let story_ids = active.story_ids.clone();
      self
        .on_update_active_stories(key.owner, max_read_story_id, story_ids, false)
        .await;
    }
  }

  pub(super) async fn on_story_viewers_expire_timeout(&mut self, global_id: GlobalId) {
    let Some(key) = self.story_by_global_id(global_id) else { return };
    let Some(story) = self.stories.get(&key) else { return };
    if self.can_get_viewers(key, story) {
      self.on_story_changed(key, false, false, false).await;
      return;
    }
    if story.content.is_some() && story.update_sent {
      self.send_story_update(key);
    }
    self.cached_viewers.remove(&key);
  }
}

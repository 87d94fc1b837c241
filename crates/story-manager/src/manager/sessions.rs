//! Opening and closing stories, references from messages and reports.

use story_core::{
  ids::{GlobalId, StoryKey},
  remote::ReportReason,
};

use super::{StoryManager, StoryRemote, StoryStore, reload::ReloadWaiter, timers::until};
use crate::{Error, Result, event::{Event, TimerKey}, promise::Promise};

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  fn check_opened_key(&self, key: StoryKey) -> Result<()> {
    if !self.remote.have_owner(key.owner) {
      return Err(Error::validation("Story sender not found"));
    }
    if !key.story_id.is_server() {
      return Err(Error::validation("Invalid story identifier specified"));
    }
    Ok(())
  }

  /// The story is on screen. Starts reload polling and, depending on the
  /// story, view counting, view reporting or the read watermark.
  pub(super) async fn open_story(&mut self, key: StoryKey, reply: Promise<()>) {
    if let Err(err) = self.check_opened_key(key) {
      return reply.fail(err);
    }
    let Some(story) = self.stories.get(&key) else {
      return reply.ok(());
    };
    let global_id = story.global_id;
    let has_content = story.content.is_some();
    let receive_date = story.receive_date;
    let is_pinned = story.is_pinned;

    if self.is_owned(key.owner) {
      let count = self.opened_owned.entry(key).or_insert(0);
      *count += 1;
      if *count == 1 {
        self.load_story_view(key.story_id);
      }
      self.schedule_interaction_update();
    }

    if !has_content {
      return reply.ok(());
    }

    let count = self.opened.entry(key).or_insert(0);
    *count += 1;
    if *count == 1 {
      let now = self.now();
      let at = receive_date.saturating_add(self.config.opened_story_poll_period);
      self.timers.arm(TimerKey::Reload(global_id), until(now, at));
    }

    if self.is_active_story(key) {
      if self.on_update_read_stories(key.owner, key.story_id).await {
        self.read_stories_on_server(key.owner, key.story_id, None).await;
      }
    } else if is_pinned {
      self.queue_story_view(key);
    }
    reply.ok(());
  }

  pub(super) fn close_story(&mut self, key: StoryKey, reply: Promise<()>) {
    if let Err(err) = self.check_opened_key(key) {
      return reply.fail(err);
    }

    if self.is_owned(key.owner) {
      match self.opened_owned.get_mut(&key) {
        Some(count) if *count > 0 => {
          *count -= 1;
          if *count == 0 {
            self.opened_owned.remove(&key);
            if self.opened_owned.is_empty() {
              self.timers.cancel(TimerKey::InteractionUpdate);
            }
          }
        }
        _ => return reply.fail(Error::validation("The story wasn't opened")),
      }
    }

    let Some(story) = self.stories.get(&key) else {
      return reply.ok(());
    };
    let global_id = story.global_id;
    if let Some(count) = self.opened.get_mut(&key) {
      *count -= 1;
      if *count == 0 {
        self.opened.remove(&key);
        self.timers.cancel(TimerKey::Reload(global_id));
      }
    }
    reply.ok(());
  }

  /// A message that references the story was shown. A story seen long ago
  /// is refreshed.
  pub(super) async fn view_story_reference(&mut self, key: StoryKey) {
    if !key.story_id.is_server() {
      return;
    }
    let stale_before = self.now() - self.config.viewed_story_poll_period;
    let fresh = self.get_story_force(key).await
      && self
        .stories
        .get(&key)
        .is_some_and(|story| story.receive_date >= stale_before);
    if !fresh {
      self.reload_story(key, ReloadWaiter::None);
    }
  }

  pub(super) fn report_story(&mut self, key: StoryKey, reason: ReportReason, reply: Promise<()>) {
    if let Err(err) = self.check_opened_key(key) {
      return reply.fail(err);
    }
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.report_story(key, reason).await;
      Event::RemoteDone { result, reply }
    });
  }

  // ─── Reload polling ──────────────────────────────────────────────────────

  /// An opened story is due for a refresh. Polling continues while it stays
  /// open.
  pub(super) fn on_story_reload_timeout(&mut self, global_id: GlobalId) {
    let Some(key) = self.story_by_global_id(global_id) else { return };
    if !self.opened.contains_key(&key) {
      return;
    }
    self.reload_story(key, ReloadWaiter::None);
    let now = self.now();
    let at = now.saturating_add(self.config.opened_story_poll_period);
    self.timers.arm(TimerKey::Reload(global_id), until(now, at));
  }
}

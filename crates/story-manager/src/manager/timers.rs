//! One-shot timers that post back into the actor queue.
//!
//! Each armed timer carries a token. Re-arming or cancelling a key replaces
//! the token, so an expiry that was already queued when its timer changed is
//! recognised as stale and ignored.

use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc, task::AbortHandle};

use story_core::ids::GlobalId;

use super::{StoryManager, StoryRemote, StoryStore};
use crate::event::{Event, TimerKey};

pub(super) struct Timers {
  events:     mpsc::UnboundedSender<Event>,
  armed:      HashMap<TimerKey, (u64, AbortHandle)>,
  next_token: u64,
}

impl Timers {
  pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
    Self { events, armed: HashMap::new(), next_token: 0 }
  }

  /// Fire `key` after `delay`, replacing any earlier arming.
  pub fn arm(&mut self, key: TimerKey, delay: Duration) {
    self.cancel(key);
    self.next_token += 1;
    let token = self.next_token;
    let events = self.events.clone();
    let task = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = events.send(Event::Timer { key, token });
    });
    self.armed.insert(key, (token, task.abort_handle()));
  }

  pub fn cancel(&mut self, key: TimerKey) {
    if let Some((_, handle)) = self.armed.remove(&key) {
      handle.abort();
    }
  }

  /// Drop every timer belonging to one story.
  pub fn cancel_story(&mut self, global_id: GlobalId) {
    self.cancel(TimerKey::Expire(global_id));
    self.cancel(TimerKey::ViewersExpire(global_id));
    self.cancel(TimerKey::Reload(global_id));
  }

  pub fn is_armed(&self, key: TimerKey) -> bool { self.armed.contains_key(&key) }

  /// Claim a fired timer. `false` when it was re-armed or cancelled after
  /// the expiry was queued.
  pub fn fire(&mut self, key: TimerKey, token: u64) -> bool {
    match self.armed.get(&key) {
      Some((armed, _)) if *armed == token => {
        self.armed.remove(&key);
        true
      }
      _ => false,
    }
  }

  pub fn cancel_all(&mut self) {
    for (_, (_, handle)) in self.armed.drain() {
      handle.abort();
    }
  }
}

/// Whole seconds from now until `at`, never negative.
pub(super) fn until(now: i32, at: i32) -> Duration {
  Duration::from_secs(u64::try_from(at.saturating_sub(now)).unwrap_or(0))
}

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  pub(super) async fn on_timer(&mut self, key: TimerKey, token: u64) {
    if !self.timers.fire(key, token) {
      tracing::debug!(?key, "ignoring stale timer");
      return;
    }
    match key {
      TimerKey::Expire(global_id) => self.on_story_expire_timeout(global_id).await,
      TimerKey::ViewersExpire(global_id) => {
        self.on_story_viewers_expire_timeout(global_id).await
      }
      TimerKey::Reload(global_id) => self.on_story_reload_timeout(global_id),
      TimerKey::InteractionUpdate => self.update_interaction_info(),
      TimerKey::ExpiredSweep => self.load_expired_database_stories().await,
    }
  }
}

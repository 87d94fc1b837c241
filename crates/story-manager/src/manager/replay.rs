//! Startup: list state, intent log replay and the expired-story sweep.
//!
//! Replay resumes every operation whose record survived the last run. A
//! record whose operation can no longer be resumed is erased.

use std::time::Duration;

use rand_core::{OsRng, RngCore};

use story_core::{
  ids::{LogEventId, StoryKey},
  intent::{Intent, IntentRecord},
  pending::{BeingEditedStory, PendingKind, PendingOrder, PendingStory},
  story::Caption,
};

use super::{StoryManager, StoryRemote, StoryStore, pending::EditInFlight};
use crate::{event::TimerKey, promise::Promise};

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  pub(super) async fn init(&mut self) {
    if !self.config.use_database {
      tracing::info!("story manager started without persistence");
      return;
    }
    self.restore_story_lists().await;
    self.replay_intents().await;
    self.load_expired_database_stories().await;
    tracing::info!(
      pending_sends = self.yet_unsent.len(),
      pending_edits = self.being_edited.len(),
      "story manager started"
    );
  }

  async fn replay_intents(&mut self) {
    let records = match self.store.replay_all().await {
      Ok(records) => records,
      Err(err) => {
        tracing::error!(error = %err, "failed to read the intent log");
        return;
      }
    };
    tracing::debug!(count = records.len(), "replaying intents");
    for record in records {
      self.replay(record).await;
    }
  }

  async fn replay(&mut self, record: IntentRecord) {
    let id = record.id;
    let intent = match record.decode() {
      Ok(intent) => intent,
      Err(err) => {
        tracing::error!(log_event_id = %id, kind = %record.kind, error = %err, "corrupt intent");
        return self.erase_intent(Some(id)).await;
      }
    };

    match intent {
      Intent::DeleteOnServer { key } => {
        if !self.is_owned(key.owner) || !key.story_id.is_server() {
          return self.erase_intent(Some(id)).await;
        }
        self.delete_story_on_server(key, Some(id), Promise::none()).await;
      }
      Intent::ReadOnServer { owner, max_story_id } => {
        if !self.remote.have_owner(owner) {
          return self.erase_intent(Some(id)).await;
        }
        self.on_update_read_stories(owner, max_story_id).await;
        self.read_stories_on_server(owner, max_story_id, Some(id)).await;
      }
      Intent::LoadExpiring { owner } => {
        if !self.remote.have_owner(owner) {
          return self.erase_intent(Some(id)).await;
        }
        self.load_owner_expiring(owner, Some(id), None).await;
      }
      Intent::Send { pending } => self.replay_send(id, pending).await,
      Intent::Edit { pending, edit_caption, caption } => {
        self.replay_edit(id, pending, edit_caption, caption).await
      }
    }
  }

  /// Requeue a send. Its caller is gone, so the outcome is only visible
  /// through updates.
  async fn replay_send(&mut self, id: LogEventId, mut pending: PendingStory) {
    let usable = pending
      .story
      .content
      .as_ref()
      .is_some_and(|content| content.is_supported())
      && self.remote.resolve(&pending.story.dependencies());
    if !usable || !matches!(pending.kind, PendingKind::Send { .. }) {
      tracing::info!(log_event_id = %id, "dropping unsendable story");
      return self.erase_intent(Some(id)).await;
    }

    self.send_story_count += 1;
    let seq = self.send_story_count;
    pending.owner = self.my_id();
    pending.order = PendingOrder::create(seq);
    pending.log_event_id = Some(id);
    self.yet_unsent.insert(seq);
    tracing::info!(seq, log_event_id = %id, "resuming story send");
    self.upload(pending, Vec::new());
  }

  async fn replay_edit(
    &mut self,
    id: LogEventId,
    mut pending: PendingStory,
    edit_caption: bool,
    caption: Caption,
  ) {
    let key = StoryKey::new(self.my_id(), pending.story_id);
    let content_ok = pending
      .story
      .content
      .as_ref()
      .is_none_or(|content| content.is_supported());
    if !key.story_id.is_server()
      || !content_ok
      || self.being_edited.contains_key(&key)
      || !self.get_story_force(key).await
    {
      tracing::info!(log_event_id = %id, %key, "dropping unresumable story edit");
      return self.erase_intent(Some(id)).await;
    }

    let generation = self.edit_generations.entry(key).or_insert(0);
    *generation += 1;
    let generation = *generation;
    self.send_story_count += 1;
    pending.owner = key.owner;
    pending.kind = PendingKind::Edit { generation };
    pending.order = PendingOrder::edit(self.send_story_count);
    pending.log_event_id = Some(id);

    let shadow = BeingEditedStory {
      content: pending.story.content.clone(),
      caption,
      edit_caption,
      log_event_id: Some(id),
    };
    self
      .being_edited
      .insert(key, EditInFlight { shadow, waiters: Vec::new() });
    tracing::info!(%key, log_event_id = %id, "resuming story edit");

    self.on_story_changed(key, true, false, false).await;
    if pending.story.content.is_some() {
      self.upload(pending, Vec::new());
    } else {
      self.do_edit_story(pending, None).await;
    }
  }

  // ─── Expired sweep ───────────────────────────────────────────────────────

  /// Drop expired stories from the database in batches. A full batch means
  /// more are waiting, so the next one is larger and comes sooner.
  pub(super) async fn load_expired_database_stories(&mut self) {
    let before = self.now() - 1;
    let limit = self.expired_batch;
    let records = match self.store.get_expiring_stories(before, limit).await {
      Ok(records) => records,
      Err(err) => {
        tracing::error!(error = %err, "failed to read expired stories");
        Vec::new()
      }
    };

    let delay = if u32::try_from(records.len()).is_ok_and(|n| n >= limit) {
      self.expired_batch = limit.saturating_mul(2);
      Duration::from_secs(1)
    } else {
      self.expired_batch = self.config.expired_stories_batch;
      Duration::from_secs(u64::from(self.sweep_delay()))
    };
    self.timers.arm(TimerKey::ExpiredSweep, delay);

    tracing::debug!(count = records.len(), ?delay, "sweeping expired stories");
    for record in records {
      let key = record.key;
      if self.stories.contains_key(&key) {
        continue;
      }
      if self.parse_story(key, &record.data).await.is_some() {
        tracing::error!(%key, "stored story is not expired");
      }
    }
  }

  fn sweep_delay(&self) -> u32 {
    let range = &self.config.expired_sweep_delay;
    let (low, high) = (*range.start(), *range.end());
    if high <= low {
      return low;
    }
    let span = u64::from(high - low) + 1;
    low + u32::try_from(OsRng.next_u64() % span).unwrap_or(0)
  }
}

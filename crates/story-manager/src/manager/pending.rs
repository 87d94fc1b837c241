//! Sends and edits of owned stories.
//!
//! A mutation is written to the intent log before its upload starts.
//! Uploads may finish in any order, but sends reach the server strictly in
//! submission order: a ready send waits until every earlier one has been
//! answered. Edits carry a generation; a completion whose generation is no
//! longer current belongs to a superseded edit and is dropped.

use story_core::{
  ids::{FileId, LogEventId, StoryId, StoryKey},
  intent::Intent,
  pending::{BeingEditedStory, PendingKind, PendingStory},
  remote::{
    EditStoryRequest, FullStory, InputFile, RemoteError, SendStoryRequest, UploadOutcome,
  },
  story::{Caption, PrivacyRules, Story, StoryContent},
};

use super::{StoryManager, StoryRemote, StoryStore};
use crate::{
  Error, Result,
  event::Event,
  handle::{SentStory, StoryDraft},
  promise::Promise,
};

/// An edit in flight: what callers see meanwhile, and who waits for it.
#[derive(Debug, Default)]
pub(super) struct EditInFlight {
  pub shadow:  BeingEditedStory,
  pub waiters: Vec<Promise<()>>,
}

/// An uploaded send waiting for its turn.
#[derive(Debug)]
pub(super) struct ReadyStory {
  pub pending: PendingStory,
  pub file:    InputFile,
}

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  // ─── Send ────────────────────────────────────────────────────────────────

  pub(super) async fn send_story(&mut self, draft: StoryDraft, reply: Promise<SentStory>) {
    let owner = self.my_id();
    if !self
      .config
      .is_allowed_active_period(draft.active_period, self.remote.is_premium(owner))
    {
      return reply.fail(Error::validation("Invalid story active period specified"));
    }
    if !draft.content.is_supported() {
      return reply.fail(Error::validation("Unsupported story content"));
    }

    let now = self.now();
    let story = Story {
      date: now,
      expire_date: now.saturating_add(draft.active_period),
      is_pinned: draft.is_pinned,
      noforwards: draft.noforwards,
      privacy: draft.privacy,
      content: Some(draft.content),
      caption: draft.caption,
      ..Story::default()
    };

    self.send_story_count += 1;
    let seq = self.send_story_count;
    let mut pending = PendingStory::new_send(owner, seq, Self::random_id(), story);
    pending.log_event_id = self
      .append_intent(Intent::Send { pending: pending.clone() })
      .await;

    let Some(view) = self.view_of(pending.key(), &pending.story) else {
      return reply.fail(Error::validation("Unsupported story content"));
    };
    let (completion, rx) = Promise::channel();
    self.send_waiters.insert(seq, completion);
    self.yet_unsent.insert(seq);
    tracing::info!(seq, log_event_id = ?pending.log_event_id, "sending story");
    self.upload(pending, Vec::new());
    reply.ok(SentStory::new(view, rx));
  }

  /// Queue the story's file with the uploader.
  pub(super) fn upload(&mut self, pending: PendingStory, bad_parts: Vec<i32>) {
    let Some(file) = pending.file() else {
      tracing::error!(key = %pending.key(), "pending story has nothing to upload");
      return self.abandon_pending(&pending);
    };
    self.max_upload_token += 1;
    let token = self.max_upload_token;
    let order = pending.order;
    self.uploads.insert(token, pending);

    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.upload(file, bad_parts, order).await;
      Event::Uploaded { token, result }
    });
  }

  pub(super) async fn on_uploaded(
    &mut self,
    token: u64,
    result: Result<UploadOutcome, RemoteError>,
  ) {
    let Some(mut pending) = self.uploads.remove(&token) else { return };
    match result {
      Ok(UploadOutcome::Uploaded(file)) => {
        if pending.is_edit() {
          self.do_edit_story(pending, Some(file)).await;
        } else {
          let seq = pending.order.seq;
          tracing::debug!(seq, "story upload finished");
          self.ready_to_send.insert(seq, ReadyStory { pending, file });
          self.try_send_next();
        }
      }
      Ok(UploadOutcome::AlreadyRemote { is_web: true }) => {
        let err = Error::Upload("Can't use web photo as a story".into());
        self.delete_pending_story(pending, Err(err)).await;
      }
      Ok(UploadOutcome::AlreadyRemote { is_web: false }) => {
        if pending.was_reuploaded {
          let err = Error::Upload("Failed to reupload story".into());
          self.delete_pending_story(pending, Err(err)).await;
        } else {
          pending.was_reuploaded = true;
          self.upload(pending, vec![-1]);
        }
      }
      Err(err) => {
        tracing::info!(key = %pending.key(), error = %err, "story upload failed");
        self.delete_pending_story(pending, Err(err.into())).await;
      }
    }
  }

  /// Send the oldest unanswered story if its upload has finished.
  fn try_send_next(&mut self) {
    let Some(&seq) = self.yet_unsent.first() else { return };
    let Some(ReadyStory { pending, file }) = self.ready_to_send.remove(&seq) else {
      return;
    };
    let (Some(content), PendingKind::Send { random_id }) =
      (pending.story.content.clone(), &pending.kind)
    else {
      tracing::error!(seq, "ready story cannot be submitted");
      self.remote.cancel_upload(file.file);
      return self.abandon_pending(&pending);
    };
    let request = SendStoryRequest {
      random_id: *random_id,
      file: file.clone(),
      content,
      caption: pending.story.caption.clone(),
      privacy: pending.story.privacy.clone(),
      period: pending.story.expire_date - pending.story.date,
      is_pinned: pending.story.is_pinned,
      noforwards: pending.story.noforwards,
    };

    tracing::debug!(seq, "submitting story");
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.send_story(request).await;
      Event::SendDone { pending, file, result }
    });
  }

  pub(super) async fn on_send_done(
    &mut self,
    pending: PendingStory,
    file: InputFile,
    result: Result<FullStory, RemoteError>,
  ) {
    match result {
      Ok(story) => {
        let owner = pending.owner;
        let outcome = match self.on_get_new_story(owner, story).await {
          Some(story_id) => {
            let key = StoryKey::new(owner, story_id);
            self.send_story_update(key);
            Ok(key)
          }
          None => Err(Error::StoryNotFound),
        };
        self.delete_pending_story(pending, outcome).await;
      }
      Err(RemoteError::FilePartsMissing(parts)) => {
        tracing::info!(
          seq = pending.order.seq,
          file = file.file.0,
          ?parts,
          "resending missing file parts"
        );
        self.upload(pending, parts);
      }
      Err(err) => {
        tracing::info!(seq = pending.order.seq, error = %err, "failed to send story");
        self.delete_pending_story(pending, Err(err.into())).await;
      }
    }
  }

  // ─── Edit ────────────────────────────────────────────────────────────────

  pub(super) async fn edit_story(
    &mut self,
    story_id: StoryId,
    content: Option<StoryContent>,
    caption: Option<Caption>,
    reply: Promise<()>,
  ) {
    let key = StoryKey::new(self.my_id(), story_id);
    if !self.get_story_force(key).await {
      return reply.fail(Error::StoryNotFound);
    }
    if !story_id.is_server() {
      return reply.fail(Error::validation("Story can't be edited"));
    }
    if content.as_ref().is_some_and(|content| !content.is_supported()) {
      return reply.fail(Error::validation("Unsupported story content"));
    }

    // A caption equal to the one shown already is not an edit.
    let caption = caption.filter(|caption| {
      let shown = match self.being_edited.get(&key) {
        Some(edit) if edit.shadow.edit_caption => Some(&edit.shadow.caption),
        _ => self.stories.get(&key).map(|story| &story.caption),
      };
      shown != Some(caption)
    });
    if content.is_none() && caption.is_none() {
      return reply.ok(());
    }

    let generation = self.edit_generations.entry(key).or_insert(0);
    let edit = self.being_edited.entry(key).or_default();
    if let Some(content) = content {
      edit.shadow.content = Some(content);
      *generation += 1;
    }
    if let Some(caption) = caption {
      edit.shadow.caption = caption;
      edit.shadow.edit_caption = true;
      *generation += 1;
    }
    edit.waiters.push(reply);
    let generation = *generation;

    let shadow = edit.shadow.clone();
    let story = Story { content: shadow.content.clone(), ..Story::default() };
    self.send_story_count += 1;
    let pending = PendingStory::new_edit(key, self.send_story_count, generation, story);

    if self.config.use_database {
      let intent = Intent::Edit {
        pending:      pending.clone(),
        edit_caption: shadow.edit_caption,
        caption:      shadow.caption,
      };
      let log_event_id = self.rewrite_intent(shadow.log_event_id, intent).await;
      if let Some(edit) = self.being_edited.get_mut(&key) {
        edit.shadow.log_event_id = log_event_id;
      }
    }

    tracing::info!(%key, generation, "editing story");
    self.on_story_changed(key, true, true, false).await;
    if pending.story.content.is_some() {
      self.upload(pending, Vec::new());
    } else {
      self.do_edit_story(pending, None).await;
    }
  }

  fn is_current_edit(&self, pending: &PendingStory) -> bool {
    let key = pending.key();
    self.stories.contains_key(&key)
      && self.being_edited.contains_key(&key)
      && self.edit_generations.get(&key).copied() == pending.generation()
  }

  pub(super) async fn do_edit_story(&mut self, pending: PendingStory, file: Option<InputFile>) {
    let key = pending.key();
    if !self.is_current_edit(&pending) {
      tracing::info!(%key, "skipping superseded story edit");
      if let Some(file) = &file {
        self.remote.cancel_upload(file.file);
      }
      return;
    }
    let Some(edit) = self.being_edited.get(&key) else { return };
    let request = EditStoryRequest {
      story_id: key.story_id,
      content:  file.as_ref().and(edit.shadow.content.clone()),
      caption:  edit.shadow.edit_caption.then(|| edit.shadow.caption.clone()),
      file:     file.clone(),
    };
    let file = file.map(|file| file.file);

    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.edit_story(request).await;
      Event::EditDone { pending, file, result }
    });
  }

  pub(super) async fn on_edit_done(
    &mut self,
    pending: PendingStory,
    file: Option<FileId>,
    result: Result<FullStory, RemoteError>,
  ) {
    let key = pending.key();
    match result {
      Ok(story) => {
        self.on_get_new_story(key.owner, story).await;
        self.delete_pending_story(pending, Ok(key)).await;
      }
      Err(RemoteError::NotModified) => {
        self.delete_pending_story(pending, Ok(key)).await;
      }
      Err(RemoteError::FilePartsMissing(parts)) if file.is_some() => {
        tracing::info!(%key, ?parts, "resending missing file parts");
        self.upload(pending, parts);
      }
      Err(err) => {
        tracing::info!(%key, error = %err, "failed to edit story");
        self.delete_pending_story(pending, Err(err.into())).await;
      }
    }
  }

  // ─── Completion ──────────────────────────────────────────────────────────

  /// Finish a send or edit: erase its intent and resolve its waiters.
  async fn delete_pending_story(&mut self, pending: PendingStory, result: Result<StoryKey>) {
    if let Some(file) = pending.file() {
      self.remote.delete_partial_upload(file);
    }

    if pending.is_edit() {
      let key = pending.key();
      if !self.is_current_edit(&pending) {
        tracing::info!(%key, "ignoring completion of a superseded story edit");
        return;
      }
      let Some(edit) = self.being_edited.remove(&key) else { return };
      let is_changed = edit.shadow.content.is_some()
        || (edit.shadow.edit_caption
          && self
            .stories
            .get(&key)
            .is_some_and(|story| story.caption != edit.shadow.caption));
      self.on_story_changed(key, is_changed, true, false).await;
      self.erase_intent(edit.shadow.log_event_id).await;
      Promise::resolve_all(edit.waiters, result.map(|_| ()));
      return;
    }

    let seq = pending.order.seq;
    self.yet_unsent.remove(&seq);
    self.erase_intent(pending.log_event_id).await;
    if let Some(waiter) = self.send_waiters.remove(&seq) {
      waiter.resolve(result);
    }
    self.try_send_next();
  }

  /// Drop a send or edit that can never reach the server without holding
  /// up the ones behind it. Its intent fails validation on the next replay.
  fn abandon_pending(&mut self, pending: &PendingStory) {
    let err = Error::Upload("Story has nothing to upload".into());
    if pending.is_edit() {
      if self.is_current_edit(pending)
        && let Some(edit) = self.being_edited.remove(&pending.key())
      {
        Promise::resolve_all(edit.waiters, Err(err));
      }
      return;
    }
    let seq = pending.order.seq;
    self.yet_unsent.remove(&seq);
    if let Some(waiter) = self.send_waiters.remove(&seq) {
      waiter.fail(err);
    }
    self.try_send_next();
  }

  // ─── Other mutations ─────────────────────────────────────────────────────

  pub(super) async fn edit_story_privacy(
    &mut self,
    story_id: StoryId,
    privacy: PrivacyRules,
    reply: Promise<()>,
  ) {
    let key = StoryKey::new(self.my_id(), story_id);
    if !self.get_story_force(key).await {
      return reply.fail(Error::StoryNotFound);
    }
    if !story_id.is_server() {
      return reply.fail(Error::validation("Invalid story identifier"));
    }
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.edit_story_privacy(story_id, privacy).await;
      Event::RemoteDone { result, reply }
    });
  }

  pub(super) async fn toggle_story_pinned(
    &mut self,
    story_id: StoryId,
    is_pinned: bool,
    reply: Promise<()>,
  ) {
    let key = StoryKey::new(self.my_id(), story_id);
    if !self.get_story_force(key).await {
      return reply.fail(Error::StoryNotFound);
    }
    if !story_id.is_server() {
      return reply.fail(Error::validation("Invalid story identifier"));
    }
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.toggle_story_pinned(story_id, is_pinned).await;
      Event::PinnedToggled { key, is_pinned, result, reply }
    });
  }

  pub(super) async fn on_pinned_toggled(
    &mut self,
    key: StoryKey,
    is_pinned: bool,
    result: Result<(), RemoteError>,
    reply: Promise<()>,
  ) {
    if let Err(err) = result {
      return reply.fail(err.into());
    }
    if let Some(story) = self.stories.get_mut(&key)
      && story.is_pinned != is_pinned
    {
      story.is_pinned = is_pinned;
      self.on_story_changed(key, true, true, false).await;
    }
    reply.ok(());
  }

  pub(super) async fn delete_story(&mut self, story_id: StoryId, reply: Promise<()>) {
    let key = StoryKey::new(self.my_id(), story_id);
    if !self.stories.contains_key(&key) && !self.get_story_force(key).await {
      return reply.fail(Error::StoryNotFound);
    }
    if !story_id.is_server() {
      return reply.fail(Error::validation("Invalid story identifier"));
    }
    self.delete_story_on_server(key, None, reply).await;
    self.on_delete_story(key).await;
  }

  /// Delete an owned story on the server. The key is marked deleted at
  /// once so that nothing reloads it meanwhile.
  pub(super) async fn delete_story_on_server(
    &mut self,
    key: StoryKey,
    log_event_id: Option<LogEventId>,
    reply: Promise<()>,
  ) {
    self.deleted.insert(key);
    let log_event_id = match log_event_id {
      Some(id) => Some(id),
      None => self.append_intent(Intent::DeleteOnServer { key }).await,
    };
    tracing::info!(%key, "deleting story on the server");
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.delete_stories(vec![key.story_id]).await;
      Event::DeleteDone { key, log_event_id, result, reply }
    });
  }

  pub(super) async fn on_delete_done(
    &mut self,
    key: StoryKey,
    log_event_id: Option<LogEventId>,
    result: Result<(), RemoteError>,
    reply: Promise<()>,
  ) {
    if let Err(err) = &result {
      tracing::info!(%key, error = %err, "failed to delete story on the server");
    }
    self.erase_intent(log_event_id).await;
    reply.resolve(result.map_err(Into::into));
  }
}

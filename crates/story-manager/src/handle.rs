//! [`StoryManagerHandle`]: the cloneable front door of the manager actor.

use tokio::sync::{mpsc, oneshot};

use story_core::{
  ids::{ContextId, OwnerId, StoryId, StoryKey, StoryListId},
  remote::{RemoteStory, ReportReason},
  story::{Caption, PrivacyRules, StoryContent},
  update::{ActiveStoriesView, StoriesView, StoryView, Update, ViewersView},
  viewers::StoryViewer,
};

use crate::{
  Error, Result,
  event::{Command, Event},
  promise::Promise,
};

// ─── Requests and replies ────────────────────────────────────────────────────

/// A story to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryDraft {
  pub content:       StoryContent,
  pub caption:       Caption,
  pub privacy:       PrivacyRules,
  /// Seconds the story stays active.
  pub active_period: i32,
  pub is_pinned:     bool,
  pub noforwards:    bool,
}

/// The optimistic view of a story being sent, plus its completion.
#[derive(Debug)]
pub struct SentStory {
  pub view:   StoryView,
  completion: oneshot::Receiver<Result<StoryKey>>,
}

impl SentStory {
  pub(crate) fn new(view: StoryView, completion: oneshot::Receiver<Result<StoryKey>>) -> Self {
    Self { view, completion }
  }

  /// Wait for the server to accept the story. Resolves with the key it was
  /// assigned, or the failure.
  pub async fn completion(self) -> Result<StoryKey> {
    self.completion.await.unwrap_or(Err(Error::Aborted))
  }
}

/// An opened story. Dropping it closes the story and stops its polling.
#[derive(Debug)]
pub struct StorySession {
  key: StoryKey,
  tx:  mpsc::UnboundedSender<Event>,
}

impl StorySession {
  pub fn key(&self) -> StoryKey { self.key }
}

impl Drop for StorySession {
  fn drop(&mut self) {
    let _ = self.tx.send(Event::Command(Command::CloseStory {
      key:   self.key,
      reply: Promise::none(),
    }));
  }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Sends commands to the manager. Every request fails with
/// [`Error::Aborted`] once the manager has stopped.
#[derive(Debug, Clone)]
pub struct StoryManagerHandle {
  tx: mpsc::UnboundedSender<Event>,
}

impl StoryManagerHandle {
  pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self { Self { tx } }

  async fn request<T>(&self, command: impl FnOnce(Promise<T>) -> Command) -> Result<T> {
    let (reply, rx) = Promise::channel();
    self
      .tx
      .send(Event::Command(command(reply)))
      .map_err(|_| Error::Aborted)?;
    rx.await.map_err(|_| Error::Aborted)?
  }

  fn notify(&self, command: Command) {
    if self.tx.send(Event::Command(command)).is_err() {
      tracing::debug!("story manager is gone; dropping notification");
    }
  }

  // ── Stories ─────────────────────────────────────────────────────────

  /// The story, reloading it from the server unless `only_local` is set.
  /// `None` when it does not exist or is not accessible.
  pub async fn get_story(&self, key: StoryKey, only_local: bool) -> Result<Option<StoryView>> {
    self
      .request(|reply| Command::GetStory { key, only_local, reply })
      .await
  }

  pub async fn get_owner_expiring_stories(&self, owner: OwnerId) -> Result<ActiveStoriesView> {
    self
      .request(|reply| Command::GetOwnerExpiringStories { owner, reply })
      .await
  }

  pub async fn get_pinned_stories(
    &self,
    owner: OwnerId,
    from: StoryId,
    limit: i32,
  ) -> Result<StoriesView> {
    self
      .request(|reply| Command::GetPinnedStories { owner, from, limit, reply })
      .await
  }

  pub async fn get_story_archive(&self, from: StoryId, limit: i32) -> Result<StoriesView> {
    self
      .request(|reply| Command::GetStoryArchive { from, limit, reply })
      .await
  }

  pub fn apply_story(&self, owner: OwnerId, story: RemoteStory) {
    self.notify(Command::ApplyStory { owner, story });
  }

  pub fn apply_read_stories(&self, owner: OwnerId, max_read_story_id: StoryId) {
    self.notify(Command::ApplyReadStories { owner, max_read_story_id });
  }

  // ── Lists ───────────────────────────────────────────────────────────

  /// Load the next page of owners in `list`. Fails with
  /// [`Error::NotFound`] once the list is fully loaded.
  pub async fn load_active_stories(&self, list: StoryListId) -> Result<()> {
    self
      .request(|reply| Command::LoadActiveStories { list, reply })
      .await
  }

  pub fn reload_active_stories(&self) { self.notify(Command::ReloadActiveStories); }

  /// Move an owner to the archive list (`hidden`) or back to the main list.
  pub async fn toggle_owner_hidden(&self, owner: OwnerId, hidden: bool) -> Result<()> {
    self
      .request(|reply| Command::ToggleOwnerHidden { owner, hidden, reply })
      .await
  }

  pub fn owner_updated(&self, owner: OwnerId) { self.notify(Command::OwnerUpdated { owner }); }

  // ── Sessions and references ─────────────────────────────────────────

  pub async fn open_story(&self, key: StoryKey) -> Result<StorySession> {
    self
      .request(|reply| Command::OpenStory { key, reply })
      .await?;
    Ok(StorySession { key, tx: self.tx.clone() })
  }

  /// A message referencing the story was shown.
  pub fn view_story_reference(&self, key: StoryKey) {
    self.notify(Command::ViewReference { key });
  }

  pub fn story_replied(&self, key: StoryKey, replier: OwnerId) {
    self.notify(Command::StoryReplied { key, replier });
  }

  pub fn register_reference(&self, key: StoryKey, context: ContextId) {
    self.notify(Command::RegisterReference { key, context });
  }

  pub fn unregister_reference(&self, key: StoryKey, context: ContextId) {
    self.notify(Command::UnregisterReference { key, context });
  }

  // ── Viewers ─────────────────────────────────────────────────────────

  pub async fn get_story_viewers(
    &self,
    story_id: StoryId,
    offset: StoryViewer,
    limit: i32,
  ) -> Result<ViewersView> {
    self
      .request(|reply| Command::GetStoryViewers { story_id, offset, limit, reply })
      .await
  }

  pub async fn report_story(&self, key: StoryKey, reason: ReportReason) -> Result<()> {
    self
      .request(|reply| Command::ReportStory { key, reason, reply })
      .await
  }

  // ── Mutations ───────────────────────────────────────────────────────

  pub async fn send_story(&self, draft: StoryDraft) -> Result<SentStory> {
    self
      .request(|reply| Command::SendStory { draft, reply })
      .await
  }

  /// Replace the content and/or caption of an owned story. Resolves once
  /// the server has accepted the edit or a newer edit superseded it.
  pub async fn edit_story(
    &self,
    story_id: StoryId,
    content: Option<StoryContent>,
    caption: Option<Caption>,
  ) -> Result<()> {
    self
      .request(|reply| Command::EditStory { story_id, content, caption, reply })
      .await
  }

  pub async fn edit_story_privacy(&self, story_id: StoryId, privacy: PrivacyRules) -> Result<()> {
    self
      .request(|reply| Command::EditStoryPrivacy { story_id, privacy, reply })
      .await
  }

  pub async fn toggle_story_pinned(&self, story_id: StoryId, is_pinned: bool) -> Result<()> {
    self
      .request(|reply| Command::ToggleStoryPinned { story_id, is_pinned, reply })
      .await
  }

  pub async fn delete_story(&self, story_id: StoryId) -> Result<()> {
    self
      .request(|reply| Command::DeleteStory { story_id, reply })
      .await
  }

  // ── State ───────────────────────────────────────────────────────────

  /// Every update a freshly connected client needs to catch up.
  pub async fn get_current_state(&self) -> Result<Vec<Update>> {
    self
      .request(|reply| Command::GetCurrentState { reply })
      .await
  }

  /// Stop the manager. Mutations backed by an intent stay in the log and
  /// resume on the next start.
  pub async fn shutdown(&self) -> Result<()> {
    self.request(|reply| Command::Shutdown { reply }).await
  }
}

//! The manager actor.
//!
//! [`StoryManager`] owns every map of the story subsystem. It is driven by a
//! single queue of [`Event`]s: caller commands, completions of spawned
//! network calls and timer expiries. Handlers live in the submodules, one per
//! concern, all as `impl` blocks on the same struct.

mod active;
mod entities;
mod lists;
mod pending;
mod reload;
mod replay;
mod sessions;
mod timers;
mod viewers;

use std::{
  collections::{BTreeMap, BTreeSet, HashMap, HashSet},
  future::Future,
  sync::Arc,
};

use rand_core::{OsRng, RngCore};
use tokio::sync::mpsc;

use story_core::{
  active::ActiveStories,
  clock::Clock,
  ids::{ContextId, GlobalId, LogEventId, OwnerId, StoryId, StoryKey, StoryListId},
  intent::Intent,
  list::StoryList,
  pending::PendingStory,
  remote::{Directory, MediaUploader, StoryNetwork},
  store::{IntentLog, StoryDatabase},
  story::Story,
  update::{Update, UpdateSink},
};

use crate::{
  config::ManagerConfig,
  event::{Command, Event},
  handle::StoryManagerHandle,
  promise::Promise,
};

use self::{
  active::ExpiringLoad,
  pending::{EditInFlight, ReadyStory},
  reload::ReloadWaiter,
  timers::Timers,
  viewers::{CachedViewers, PendingViews},
};

// ─── Collaborator bounds ─────────────────────────────────────────────────────

/// Persistence the manager runs on: the story database plus the intent log.
pub trait StoryStore: StoryDatabase + IntentLog + 'static {}

impl<T: StoryDatabase + IntentLog + 'static> StoryStore for T {}

/// Everything remote: the story RPCs, the uploader and the user directory.
pub trait StoryRemote: StoryNetwork + MediaUploader + Directory + 'static {}

impl<T: StoryNetwork + MediaUploader + Directory + 'static> StoryRemote for T {}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct StoryManager<S, R> {
  store:                 Arc<S>,
  remote:                Arc<R>,
  clock:                 Arc<dyn Clock>,
  sink:                  Arc<dyn UpdateSink>,
  config:                ManagerConfig,
  events:                mpsc::UnboundedSender<Event>,
  timers:                Timers,

  // ── Entities ────────────────────────────────────────────────────────
  stories:               HashMap<StoryKey, Story>,
  stories_by_global_id:  HashMap<GlobalId, StoryKey>,
  max_global_id:         u64,
  failed_to_load:        HashSet<StoryKey>,
  /// Stories deleted by this client; never reloaded.
  deleted:               HashSet<StoryKey>,
  /// When each story was last found to be inaccessible.
  inaccessible:          HashMap<StoryKey, i32>,
  references:            HashMap<StoryKey, BTreeSet<ContextId>>,
  reload_waiters:        HashMap<StoryKey, Vec<ReloadWaiter>>,

  // ── Active stories and lists ────────────────────────────────────────
  active:                HashMap<OwnerId, ActiveStories>,
  failed_to_load_active: HashSet<OwnerId>,
  /// Read watermarks of owners without active stories in memory.
  max_read_story_ids:    HashMap<OwnerId, StoryId>,
  lists:                 [StoryList; 2],
  list_db_waiters:       [Vec<Promise<()>>; 2],
  list_server_waiters:   [Vec<Promise<()>>; 2],
  expiring_loads:        HashMap<OwnerId, ExpiringLoad>,

  // ── Pending mutations ───────────────────────────────────────────────
  send_story_count:      u32,
  /// Sequence numbers of sends not yet answered by the server.
  yet_unsent:            BTreeSet<u32>,
  ready_to_send:         BTreeMap<u32, ReadyStory>,
  send_waiters:          HashMap<u32, Promise<StoryKey>>,
  uploads:               HashMap<u64, PendingStory>,
  max_upload_token:      u64,
  being_edited:          HashMap<StoryKey, EditInFlight>,
  edit_generations:      HashMap<StoryKey, u64>,

  // ── Viewers ─────────────────────────────────────────────────────────
  cached_viewers:        HashMap<StoryKey, CachedViewers>,
  pending_views:         HashMap<OwnerId, PendingViews>,

  // ── Sessions ────────────────────────────────────────────────────────
  opened_owned:          HashMap<StoryKey, u32>,
  opened:                HashMap<StoryKey, u32>,
  expired_batch:         u32,
}

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  /// Spawn the manager on the current runtime and return its handle.
  ///
  /// Startup restores list pagination state, replays the intent log and
  /// begins the expired-story sweep before the first command is served.
  pub fn start(
    store: Arc<S>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn UpdateSink>,
    config: ManagerConfig,
  ) -> StoryManagerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = Self::new(store, remote, clock, sink, config, tx.clone());
    tokio::spawn(manager.run(rx));
    StoryManagerHandle::new(tx)
  }

  fn new(
    store: Arc<S>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn UpdateSink>,
    config: ManagerConfig,
    events: mpsc::UnboundedSender<Event>,
  ) -> Self {
    let expired_batch = config.expired_stories_batch;
    Self {
      store,
      remote,
      clock,
      sink,
      config,
      timers: Timers::new(events.clone()),
      events,
      stories: HashMap::new(),
      stories_by_global_id: HashMap::new(),
      max_global_id: 0,
      failed_to_load: HashSet::new(),
      deleted: HashSet::new(),
      inaccessible: HashMap::new(),
      references: HashMap::new(),
      reload_waiters: HashMap::new(),
      active: HashMap::new(),
      failed_to_load_active: HashSet::new(),
      max_read_story_ids: HashMap::new(),
      lists: Default::default(),
      list_db_waiters: Default::default(),
      list_server_waiters: Default::default(),
      expiring_loads: HashMap::new(),
      send_story_count: 0,
      yet_unsent: BTreeSet::new(),
      ready_to_send: BTreeMap::new(),
      send_waiters: HashMap::new(),
      uploads: HashMap::new(),
      max_upload_token: 0,
      being_edited: HashMap::new(),
      edit_generations: HashMap::new(),
      cached_viewers: HashMap::new(),
      pending_views: HashMap::new(),
      opened_owned: HashMap::new(),
      opened: HashMap::new(),
      expired_batch,
    }
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
    self.init().await;

    while let Some(event) = rx.recv().await {
      if let Event::Command(Command::Shutdown { reply }) = event {
        self.shutdown();
        rx.close();
        // Whatever is still queued is dropped with its reply slots.
        while rx.try_recv().is_ok() {}
        reply.ok(());
        break;
      }
      self.handle(event).await;
    }
    tracing::info!("story manager stopped");
  }

  async fn handle(&mut self, event: Event) {
    match event {
      Event::Command(command) => self.dispatch(command).await,
      Event::Timer { key, token } => self.on_timer(key, token).await,
      Event::ListDbPageLoaded { list, result } => {
        self.on_list_db_page_loaded(list, result).await
      }
      Event::ListPageLoaded { list, is_next, result } => {
        self.on_list_page_loaded(list, is_next, result).await
      }
      Event::StoriesReloaded { owner, story_ids, result } => {
        self.on_stories_reloaded(owner, story_ids, result).await
      }
      Event::ExpiringLoaded { owner, result } => {
        self.on_expiring_loaded(owner, result).await
      }
      Event::PageLoaded { owner, result, reply } => {
        self.on_page_loaded(owner, result, reply).await
      }
      Event::Uploaded { token, result } => self.on_uploaded(token, result).await,
      Event::SendDone { pending, file, result } => {
        self.on_send_done(pending, file, result).await
      }
      Event::EditDone { pending, file, result } => {
        self.on_edit_done(pending, file, result).await
      }
      Event::DeleteDone { key, log_event_id, result, reply } => {
        self.on_delete_done(key, log_event_id, result, reply).await
      }
      Event::ReadDone { owner, log_event_id, result } => {
        self.on_read_done(owner, log_event_id, result).await
      }
      Event::ViewsIncremented { owner, result } => {
        self.on_views_incremented(owner, result)
      }
      Event::ViewersLoaded { key, offset, result, reply } => {
        self.on_viewers_loaded(key, offset, result, reply).await
      }
      Event::InteractionLoaded { story_ids, result } => {
        self.on_interaction_loaded(story_ids, result).await
      }
      Event::PinnedToggled { key, is_pinned, result, reply } => {
        self.on_pinned_toggled(key, is_pinned, result, reply).await
      }
      Event::OwnerHiddenToggled { owner, hidden, result, reply } => {
        self.on_owner_hidden_toggled(owner, hidden, result, reply).await
      }
      Event::RemoteDone { result, reply } => {
        reply.resolve(result.map_err(Into::into))
      }
    }
  }

  async fn dispatch(&mut self, command: Command) {
    match command {
      Command::GetStory { key, only_local, reply } => {
        self.get_story(key, only_local, reply).await
      }
      Command::GetOwnerExpiringStories { owner, reply } => {
        self.get_owner_expiring_stories(owner, reply).await
      }
      Command::LoadActiveStories { list, reply } => {
        self.load_active_stories(list, reply).await
      }
      Command::ReloadActiveStories => {
        for list in [StoryListId::Main, StoryListId::Archive] {
          self.load_active_stories_from_server(list, false, Promise::none());
        }
      }
      Command::ToggleOwnerHidden { owner, hidden, reply } => {
        self.toggle_owner_hidden(owner, hidden, reply)
      }
      Command::OwnerUpdated { owner } => self.on_owner_order_updated(owner).await,
      Command::GetPinnedStories { owner, from, limit, reply } => {
        self.get_pinned_stories(owner, from, limit, reply)
      }
      Command::GetStoryArchive { from, limit, reply } => {
        self.get_story_archive(from, limit, reply)
      }
      Command::GetStoryViewers { story_id, offset, limit, reply } => {
        self.get_story_viewers(story_id, offset, limit, reply)
      }
      Command::ReportStory { key, reason, reply } => {
        self.report_story(key, reason, reply)
      }
      Command::OpenStory { key, reply } => self.open_story(key, reply).await,
      Command::CloseStory { key, reply } => self.close_story(key, reply),
      Command::ViewReference { key } => self.view_story_reference(key).await,
      Command::StoryReplied { key, replier } => self.on_story_replied(key, replier),
      Command::RegisterReference { key, context } => {
        self.references.entry(key).or_default().insert(context);
      }
      Command::UnregisterReference { key, context } => {
        if let Some(contexts) = self.references.get_mut(&key) {
          contexts.remove(&context);
          if contexts.is_empty() {
            self.references.remove(&key);
          }
        }
      }
      Command::SendStory { draft, reply } => self.send_story(draft, reply).await,
      Command::EditStory { story_id, content, caption, reply } => {
        self.edit_story(story_id, content, caption, reply).await
      }
      Command::EditStoryPrivacy { story_id, privacy, reply } => {
        self.edit_story_privacy(story_id, privacy, reply).await
      }
      Command::ToggleStoryPinned { story_id, is_pinned, reply } => {
        self.toggle_story_pinned(story_id, is_pinned, reply).await
      }
      Command::DeleteStory { story_id, reply } => {
        self.delete_story(story_id, reply).await
      }
      Command::ApplyStory { owner, story } => self.apply_story(owner, story).await,
      Command::ApplyReadStories { owner, max_read_story_id } => {
        self.on_update_read_stories(owner, max_read_story_id).await;
      }
      Command::GetCurrentState { reply } => reply.ok(self.current_state()),
      // Handled by the run loop.
      Command::Shutdown { reply } => reply.ok(()),
    }
  }

  /// Stop serving. Timers die with the actor. Waiters backed by a durable
  /// intent are left to the replay on the next start; without persistence
  /// there is nothing to resume, so they are aborted.
  fn shutdown(&mut self) {
    self.timers.cancel_all();

    for (_, waiters) in self.reload_waiters.drain() {
      for waiter in waiters {
        waiter.fail(crate::Error::Aborted);
      }
    }
    for waiters in self
      .list_db_waiters
      .iter_mut()
      .chain(self.list_server_waiters.iter_mut())
    {
      Promise::resolve_all(std::mem::take(waiters), Err(crate::Error::Aborted));
    }
    for (_, load) in self.expiring_loads.drain() {
      for waiter in load.waiters {
        waiter.fail(crate::Error::Aborted);
      }
    }

    if !self.config.use_database {
      for (_, waiter) in self.send_waiters.drain() {
        waiter.fail(crate::Error::Aborted);
      }
      for (_, edit) in self.being_edited.drain() {
        Promise::resolve_all(edit.waiters, Err(crate::Error::Aborted));
      }
    }

    tracing::info!(
      pending_sends = self.yet_unsent.len(),
      "story manager shutting down"
    );
  }

  // ─── Shared helpers ────────────────────────────────────────────────────

  fn now(&self) -> i32 { self.clock.unix_time() }

  fn my_id(&self) -> OwnerId { self.remote.my_id() }

  fn is_owned(&self, owner: OwnerId) -> bool { owner == self.my_id() }

  fn emit(&self, update: Update) { self.sink.send(update); }

  /// Run `task` off the actor and feed its event back into the queue.
  fn spawn<F>(&self, task: F)
  where
    F: Future<Output = Event> + Send + 'static,
  {
    let events = self.events.clone();
    tokio::spawn(async move {
      // The actor is gone when this fails; the event has nobody to serve.
      let _ = events.send(task.await);
    });
  }

  fn random_id() -> i64 {
    loop {
      let id = OsRng.next_u64() as i64;
      if id != 0 {
        return id;
      }
    }
  }

  // ── Intent log ──────────────────────────────────────────────────────

  async fn append_intent(&self, intent: Intent) -> Option<LogEventId> {
    if !self.config.use_database {
      return None;
    }
    let kind = intent.discriminant();
    match self.store.append(intent).await {
      Ok(id) => Some(id),
      Err(err) => {
        tracing::error!(kind, error = %err, "failed to append intent");
        None
      }
    }
  }

  /// Replace the record backing an operation, or start one.
  async fn rewrite_intent(
    &self,
    log_event_id: Option<LogEventId>,
    intent: Intent,
  ) -> Option<LogEventId> {
    let Some(id) = log_event_id else {
      return self.append_intent(intent).await;
    };
    match self.store.rewrite(id, intent).await {
      Ok(new_id) => Some(new_id),
      Err(err) => {
        tracing::error!(log_event_id = %id, error = %err, "failed to rewrite intent");
        Some(id)
      }
    }
  }

  async fn erase_intent(&self, log_event_id: Option<LogEventId>) {
    let Some(id) = log_event_id else { return };
    if let Err(err) = self.store.erase(id).await {
      tracing::error!(log_event_id = %id, error = %err, "failed to erase intent");
    }
  }

  // ── Snapshot ────────────────────────────────────────────────────────

  /// Every update a client needs to rebuild its view from scratch.
  fn current_state(&self) -> Vec<Update> {
    let mut updates: Vec<Update> = self
      .active
      .keys()
      .filter_map(|owner| self.active_stories_view(*owner))
      .map(Update::ChatActiveStories)
      .collect();
    for list in [StoryListId::Main, StoryListId::Archive] {
      let count = self.lists[list.index()].sent_total_count;
      if count != -1 {
        updates.push(Update::StoryListChatCount { list, count });
      }
    }
    updates
  }
}

//! Actor-level tests against in-memory collaborators.
//!
//! Every test runs on a paused clock: spawned network calls sleep for a
//! scripted latency and the runtime skips ahead whenever it is idle.

mod replay;

use std::{
  collections::{HashMap, HashSet, VecDeque},
  convert::Infallible,
  sync::{
    Arc, Mutex,
    atomic::{AtomicI32, AtomicUsize, Ordering},
  },
  time::Duration,
};

use story_core::{
  active::ListPosition,
  clock::Clock,
  ids::{FileId, LogEventId, OwnerId, StoryId, StoryKey, StoryListId},
  intent::{Intent, IntentRecord},
  list::SavedStoryList,
  pending::PendingOrder,
  remote::{
    AllStories, Directory, EditStoryRequest, FullStory, InputFile, MediaUploader,
    OwnerStories, RemoteError, RemoteStory, ReportReason, SendStoryRequest, StoriesPage,
    StoryNetwork, UploadOutcome, ViewersPage,
  },
  store::{ActiveListPage, IntentLog, StoredStory, StoryDatabase},
  story::{Caption, InteractionInfo, PrivacyRules, StoryContent},
  update::{Update, UpdateSink},
  viewers::{StoryViewer, ViewerList},
};

use crate::{ManagerConfig, StoryDraft, StoryManager, StoryManagerHandle};

pub(crate) const ME: OwnerId = OwnerId(1);
pub(crate) const FRIEND: OwnerId = OwnerId(2);
pub(crate) const START_TIME: i32 = 1000;
pub(crate) const DAY: i32 = 86_400;

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Unix time that follows the (paused) tokio clock.
pub(crate) struct TestClock {
  base:  i32,
  start: tokio::time::Instant,
}

impl TestClock {
  pub fn new() -> Arc<Self> {
    Arc::new(Self { base: START_TIME, start: tokio::time::Instant::now() })
  }
}

impl Clock for TestClock {
  fn unix_time(&self) -> i32 {
    let elapsed = i32::try_from(self.start.elapsed().as_secs()).unwrap();
    self.base + elapsed
  }
}

// ─── Sink ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct CollectingSink(Mutex<Vec<Update>>);

impl CollectingSink {
  pub fn take(&self) -> Vec<Update> { std::mem::take(&mut *self.0.lock().unwrap()) }
}

impl UpdateSink for CollectingSink {
  fn send(&self, update: Update) { self.0.lock().unwrap().push(update); }
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
  stories:     HashMap<StoryKey, (i32, Vec<u8>)>,
  active:      HashMap<OwnerId, (Option<StoryListId>, i64, Vec<u8>)>,
  list_states: HashMap<StoryListId, Vec<u8>>,
  list_saves:  HashMap<StoryListId, usize>,
  intents:     Vec<IntentRecord>,
  next_intent: u64,
}

/// Both persistence traits over plain maps.
#[derive(Default)]
pub(crate) struct MemoryStore(Mutex<StoreState>);

impl MemoryStore {
  pub fn intents(&self) -> Vec<Intent> {
    let state = self.0.lock().unwrap();
    state.intents.iter().filter_map(|record| record.decode().ok()).collect()
  }

  /// Append a record whose payload is stored verbatim.
  pub fn append_raw(&self, kind: &str, payload: &str) {
    let mut state = self.0.lock().unwrap();
    state.next_intent += 1;
    let id = LogEventId(state.next_intent);
    state.intents.push(IntentRecord {
      id,
      kind: kind.to_owned(),
      payload: payload.to_owned(),
    });
  }

  pub fn intent_count(&self) -> usize { self.0.lock().unwrap().intents.len() }

  pub fn list_saves(&self, list: StoryListId) -> usize {
    self.0.lock().unwrap().list_saves.get(&list).copied().unwrap_or(0)
  }

  pub fn list_state(&self, list: StoryListId) -> Option<SavedStoryList> {
    let state = self.0.lock().unwrap();
    state.list_states.get(&list).map(|data| serde_json::from_slice(data).unwrap())
  }

  pub fn has_story(&self, key: StoryKey) -> bool {
    self.0.lock().unwrap().stories.contains_key(&key)
  }
}

impl StoryDatabase for MemoryStore {
  type Error = Infallible;

  async fn get_story(&self, key: StoryKey) -> Result<Option<Vec<u8>>, Infallible> {
    Ok(self.0.lock().unwrap().stories.get(&key).map(|(_, data)| data.clone()))
  }

  async fn put_story(
    &self,
    key: StoryKey,
    expires_at: i32,
    data: Vec<u8>,
  ) -> Result<(), Infallible> {
    self.0.lock().unwrap().stories.insert(key, (expires_at, data));
    Ok(())
  }

  async fn delete_story(&self, key: StoryKey) -> Result<(), Infallible> {
    self.0.lock().unwrap().stories.remove(&key);
    Ok(())
  }

  async fn get_expiring_stories(
    &self,
    before: i32,
    limit: u32,
  ) -> Result<Vec<StoredStory>, Infallible> {
    let state = self.0.lock().unwrap();
    let mut expiring: Vec<_> = state
      .stories
      .iter()
      .filter(|(_, (expires_at, _))| *expires_at != 0 && *expires_at <= before)
      .map(|(key, (expires_at, data))| (*expires_at, *key, data.clone()))
      .collect();
    expiring.sort_by_key(|(expires_at, ..)| *expires_at);
    Ok(
      expiring
        .into_iter()
        .take(limit as usize)
        .map(|(_, key, data)| StoredStory { key, data })
        .collect(),
    )
  }

  async fn get_active_stories(&self, owner: OwnerId) -> Result<Option<Vec<u8>>, Infallible> {
    Ok(self.0.lock().unwrap().active.get(&owner).map(|(.., data)| data.clone()))
  }

  async fn put_active_stories(
    &self,
    owner: OwnerId,
    list: Option<StoryListId>,
    order: i64,
    data: Vec<u8>,
  ) -> Result<(), Infallible> {
    self.0.lock().unwrap().active.insert(owner, (list, order, data));
    Ok(())
  }

  async fn delete_active_stories(&self, owner: OwnerId) -> Result<(), Infallible> {
    self.0.lock().unwrap().active.remove(&owner);
    Ok(())
  }

  async fn get_active_story_list_page(
    &self,
    list: StoryListId,
    after: ListPosition,
    limit: u32,
  ) -> Result<ActiveListPage, Infallible> {
    let state = self.0.lock().unwrap();
    let mut rows: Vec<_> = state
      .active
      .iter()
      .filter(|(_, (row_list, ..))| *row_list == Some(list))
      .map(|(owner, (_, order, data))| (ListPosition::new(*order, *owner), data.clone()))
      .filter(|(position, _)| *position > after)
      .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows.truncate(limit as usize);
    let next = rows.last().map_or(after, |(position, _)| *position);
    Ok(ActiveListPage {
      owners: rows.into_iter().map(|(position, data)| (position.owner, data)).collect(),
      next,
    })
  }

  async fn get_story_list_state(&self, list: StoryListId) -> Result<Option<Vec<u8>>, Infallible> {
    Ok(self.0.lock().unwrap().list_states.get(&list).cloned())
  }

  async fn put_story_list_state(
    &self,
    list: StoryListId,
    data: Vec<u8>,
  ) -> Result<(), Infallible> {
    let mut state = self.0.lock().unwrap();
    state.list_states.insert(list, data);
    *state.list_saves.entry(list).or_insert(0) += 1;
    Ok(())
  }
}

impl IntentLog for MemoryStore {
  type Error = Infallible;

  async fn append(&self, intent: Intent) -> Result<LogEventId, Infallible> {
    let mut state = self.0.lock().unwrap();
    state.next_intent += 1;
    let id = LogEventId(state.next_intent);
    state.intents.push(IntentRecord::new(id, &intent).unwrap());
    Ok(id)
  }

  async fn rewrite(&self, id: LogEventId, intent: Intent) -> Result<LogEventId, Infallible> {
    let mut state = self.0.lock().unwrap();
    state.intents.retain(|record| record.id != id);
    state.next_intent += 1;
    let new_id = LogEventId(state.next_intent);
    state.intents.push(IntentRecord::new(new_id, &intent).unwrap());
    Ok(new_id)
  }

  async fn erase(&self, id: LogEventId) -> Result<(), Infallible> {
    self.0.lock().unwrap().intents.retain(|record| record.id != id);
    Ok(())
  }

  async fn replay_all(&self) -> Result<Vec<IntentRecord>, Infallible> {
    Ok(self.0.lock().unwrap().intents.clone())
  }
}

// ─── Remote ──────────────────────────────────────────────────────────────────

/// The server side of the story world plus a record of every call made.
#[derive(Default)]
pub(crate) struct FakeRemote {
  clock:            Mutex<Option<Arc<TestClock>>>,
  /// Stories as the server has them.
  pub server:       Mutex<HashMap<StoryKey, FullStory>>,
  pub contacts:     Mutex<HashSet<OwnerId>>,
  pub hidden:       Mutex<HashSet<OwnerId>>,
  pub viewers:      Mutex<ViewerList>,
  /// Upload latency per file; unlisted files take 10ms.
  pub upload_delay: Mutex<HashMap<FileId, Duration>>,
  /// Latencies of the next edits, in request order.
  pub edit_delays:  Mutex<VecDeque<Duration>>,
  /// When set, list requests answer that nothing changed, with this state.
  pub not_modified: Mutex<Option<String>>,
  /// Errors returned by the next sends instead of creating a story.
  pub send_errors:  Mutex<VecDeque<RemoteError>>,
  next_story_id:    AtomicI32,

  pub uploads:         Mutex<Vec<(FileId, Vec<i32>, PendingOrder)>>,
  pub sent:            Mutex<Vec<SendStoryRequest>>,
  pub edits:           Mutex<Vec<EditStoryRequest>>,
  pub deleted:         Mutex<Vec<StoryId>>,
  pub reads:           Mutex<Vec<(OwnerId, StoryId)>>,
  pub view_increments: Mutex<Vec<(OwnerId, Vec<StoryId>)>>,
  pub reload_calls:    AtomicUsize,
  pub viewer_calls:    AtomicUsize,
  pub views_calls:     AtomicUsize,
}

const LATENCY: Duration = Duration::from_millis(10);

impl FakeRemote {
  pub fn new(clock: Arc<TestClock>) -> Arc<Self> {
    let remote = Self::default();
    *remote.clock.lock().unwrap() = Some(clock);
    remote.next_story_id.store(100, Ordering::SeqCst);
    Arc::new(remote)
  }

  fn now(&self) -> i32 {
    self.clock.lock().unwrap().as_ref().map_or(START_TIME, |clock| clock.unix_time())
  }

  /// Put a story on the server, active for a day from `date`.
  pub fn publish(&self, owner: OwnerId, story_id: i32, date: i32) -> FullStory {
    let story = FullStory {
      id: StoryId(story_id),
      date,
      expire_date: date + DAY,
      is_public: true,
      privacy: PrivacyRules::everyone(),
      content: Some(StoryContent::photo(FileId(i64::from(story_id) + 1000))),
      caption: Caption::plain(format!("story {story_id}")),
      ..FullStory::default()
    };
    self
      .server
      .lock()
      .unwrap()
      .insert(StoryKey::new(owner, StoryId(story_id)), story.clone());
    story
  }

  pub fn set_view_count(&self, key: StoryKey, view_count: i32) {
    if let Some(story) = self.server.lock().unwrap().get_mut(&key) {
      story.interaction.view_count = view_count;
    }
  }

  fn owner_stories(&self, owner: OwnerId) -> Option<OwnerStories> {
    let now = self.now();
    let server = self.server.lock().unwrap();
    let mut stories: Vec<&FullStory> = server
      .iter()
      .filter(|(key, story)| key.owner == owner && story.expire_date > now)
      .map(|(_, story)| story)
      .collect();
    if stories.is_empty() {
      return None;
    }
    stories.sort_by_key(|story| story.id);
    Some(OwnerStories {
      owner,
      max_read_story_id: StoryId::NONE,
      stories: stories.into_iter().cloned().map(RemoteStory::Full).collect(),
    })
  }
}

impl StoryNetwork for FakeRemote {
  async fn get_all_stories(
    &self,
    _list: StoryListId,
    _is_next: bool,
    _state: String,
  ) -> Result<AllStories, RemoteError> {
    tokio::time::sleep(LATENCY).await;
    if let Some(state) = self.not_modified.lock().unwrap().clone() {
      return Ok(AllStories::NotModified { state });
    }
    let contacts: Vec<OwnerId> = self.contacts.lock().unwrap().iter().copied().collect();
    let owners: Vec<OwnerStories> =
      contacts.into_iter().filter_map(|owner| self.owner_stories(owner)).collect();
    Ok(AllStories::Page {
      state:       "state-1".into(),
      total_count: i32::try_from(owners.len()).unwrap(),
      has_more:    false,
      owners,
    })
  }

  async fn toggle_owner_hidden(&self, owner: OwnerId, hidden: bool) -> Result<(), RemoteError> {
    tokio::time::sleep(LATENCY).await;
    let mut set = self.hidden.lock().unwrap();
    if hidden {
      set.insert(owner);
    } else {
      set.remove(&owner);
    }
    Ok(())
  }

  async fn get_stories_by_id(
    &self,
    owner: OwnerId,
    story_ids: Vec<StoryId>,
  ) -> Result<StoriesPage, RemoteError> {
    self.reload_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(LATENCY).await;
    let server = self.server.lock().unwrap();
    let stories: Vec<RemoteStory> = story_ids
      .iter()
      .filter_map(|id| server.get(&StoryKey::new(owner, *id)).cloned())
      .map(RemoteStory::Full)
      .collect();
    Ok(StoriesPage { total_count: i32::try_from(stories.len()).unwrap(), stories })
  }

  async fn get_owner_stories(&self, owner: OwnerId) -> Result<Option<OwnerStories>, RemoteError> {
    tokio::time::sleep(LATENCY).await;
    Ok(self.owner_stories(owner))
  }

  async fn get_pinned_stories(
    &self,
    owner: OwnerId,
    _from: StoryId,
    limit: i32,
  ) -> Result<StoriesPage, RemoteError> {
    tokio::time::sleep(LATENCY).await;
    let server = self.server.lock().unwrap();
    let mut stories: Vec<FullStory> = server
      .iter()
      .filter(|(key, story)| key.owner == owner && story.is_pinned)
      .map(|(_, story)| story.clone())
      .collect();
    stories.sort_by_key(|story| std::cmp::Reverse(story.id));
    let total_count = i32::try_from(stories.len()).unwrap();
    stories.truncate(usize::try_from(limit).unwrap());
    Ok(StoriesPage { total_count, stories: stories.into_iter().map(RemoteStory::Full).collect() })
  }

  async fn get_story_archive(&self, from: StoryId, limit: i32) -> Result<StoriesPage, RemoteError> {
    self.get_pinned_stories(ME, from, limit).await
  }

  async fn send_story(&self, request: SendStoryRequest) -> Result<FullStory, RemoteError> {
    tokio::time::sleep(LATENCY).await;
    if let Some(err) = self.send_errors.lock().unwrap().pop_front() {
      return Err(err);
    }
    let id = self.next_story_id.fetch_add(1, Ordering::SeqCst);
    let date = self.now();
    let story = FullStory {
      id: StoryId(id),
      date,
      expire_date: date + request.period,
      is_pinned: request.is_pinned,
      is_public: true,
      noforwards: request.noforwards,
      privacy: request.privacy.clone(),
      content: Some(request.content.clone()),
      caption: request.caption.clone(),
      ..FullStory::default()
    };
    self.server.lock().unwrap().insert(StoryKey::new(ME, StoryId(id)), story.clone());
    self.sent.lock().unwrap().push(request);
    Ok(story)
  }

  async fn edit_story(&self, request: EditStoryRequest) -> Result<FullStory, RemoteError> {
    // Applied on arrival; the answer travels back with its own latency.
    self.edits.lock().unwrap().push(request.clone());
    let delay = self.edit_delays.lock().unwrap().pop_front().unwrap_or(LATENCY);
    let answer = {
      let mut server = self.server.lock().unwrap();
      match server.get_mut(&StoryKey::new(ME, request.story_id)) {
        Some(story) => {
          if let Some(content) = request.content {
            story.content = Some(content);
          }
          if let Some(caption) = request.caption {
            story.caption = caption;
          }
          story.is_edited = true;
          Ok(story.clone())
        }
        None => Err(RemoteError::rpc(400, "STORY_ID_INVALID")),
      }
    };
    tokio::time::sleep(delay).await;
    answer
  }

  async fn edit_story_privacy(
    &self,
    _story_id: StoryId,
    _privacy: PrivacyRules,
  ) -> Result<(), RemoteError> {
    tokio::time::sleep(LATENCY).await;
    Ok(())
  }

  async fn toggle_story_pinned(
    &self,
    story_id: StoryId,
    is_pinned: bool,
  ) -> Result<(), RemoteError> {
    tokio::time::sleep(LATENCY).await;
    if let Some(story) = self.server.lock().unwrap().get_mut(&StoryKey::new(ME, story_id)) {
      story.is_pinned = is_pinned;
    }
    Ok(())
  }

  async fn delete_stories(&self, story_ids: Vec<StoryId>) -> Result<(), RemoteError> {
    tokio::time::sleep(LATENCY).await;
    let mut server = self.server.lock().unwrap();
    for story_id in &story_ids {
      server.remove(&StoryKey::new(ME, *story_id));
    }
    self.deleted.lock().unwrap().extend(story_ids);
    Ok(())
  }

  async fn increment_story_views(
    &self,
    owner: OwnerId,
    story_ids: Vec<StoryId>,
  ) -> Result<(), RemoteError> {
    self.view_increments.lock().unwrap().push((owner, story_ids));
    tokio::time::sleep(LATENCY).await;
    Ok(())
  }

  async fn read_stories(&self, owner: OwnerId, max_story_id: StoryId) -> Result<(), RemoteError> {
    tokio::time::sleep(LATENCY).await;
    self.reads.lock().unwrap().push((owner, max_story_id));
    Ok(())
  }

  async fn get_story_viewers(
    &self,
    _story_id: StoryId,
    offset: StoryViewer,
    limit: i32,
  ) -> Result<ViewersPage, RemoteError> {
    self.viewer_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(LATENCY).await;
    let viewers = self.viewers.lock().unwrap();
    Ok(ViewersPage {
      total_count: i32::try_from(viewers.len()).unwrap(),
      viewers:     viewers.get_sublist(offset, usize::try_from(limit).unwrap()),
    })
  }

  async fn get_story_views(
    &self,
    story_ids: Vec<StoryId>,
  ) -> Result<Vec<InteractionInfo>, RemoteError> {
    self.views_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(LATENCY).await;
    let server = self.server.lock().unwrap();
    Ok(
      story_ids
        .iter()
        .map(|id| {
          server
            .get(&StoryKey::new(ME, *id))
            .map(|story| story.interaction.clone())
            .unwrap_or_default()
        })
        .collect(),
    )
  }

  async fn report_story(&self, _key: StoryKey, _reason: ReportReason) -> Result<(), RemoteError> {
    tokio::time::sleep(LATENCY).await;
    Ok(())
  }
}

impl MediaUploader for FakeRemote {
  async fn upload(
    &self,
    file: FileId,
    bad_parts: Vec<i32>,
    order: PendingOrder,
  ) -> Result<UploadOutcome, RemoteError> {
    self.uploads.lock().unwrap().push((file, bad_parts, order));
    let delay = self.upload_delay.lock().unwrap().get(&file).copied().unwrap_or(LATENCY);
    tokio::time::sleep(delay).await;
    Ok(UploadOutcome::Uploaded(InputFile { file, token: format!("upload-{}", file.0) }))
  }

  fn cancel_upload(&self, _file: FileId) {}

  fn delete_partial_upload(&self, _file: FileId) {}

  fn delete_file(&self, _file: FileId) {}
}

impl Directory for FakeRemote {
  fn my_id(&self) -> OwnerId { ME }

  fn is_premium(&self, _owner: OwnerId) -> bool { false }

  fn is_contact(&self, owner: OwnerId) -> bool { self.contacts.lock().unwrap().contains(&owner) }

  fn are_stories_hidden(&self, owner: OwnerId) -> bool {
    self.hidden.lock().unwrap().contains(&owner)
  }

  fn set_stories_hidden(&self, owner: OwnerId, hidden: bool) {
    let mut set = self.hidden.lock().unwrap();
    if hidden {
      set.insert(owner);
    } else {
      set.remove(&owner);
    }
  }

  fn have_owner(&self, owner: OwnerId) -> bool { owner.is_valid() }

  fn resolve(&self, _owners: &[OwnerId]) -> bool { true }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

pub(crate) struct Harness {
  pub handle: StoryManagerHandle,
  pub store:  Arc<MemoryStore>,
  pub remote: Arc<FakeRemote>,
  pub sink:   Arc<CollectingSink>,
  pub clock:  Arc<TestClock>,
}

impl Harness {
  pub fn start() -> Self { Self::with_config(ManagerConfig::default()) }

  pub fn with_config(config: ManagerConfig) -> Self {
    let clock = TestClock::new();
    let remote = FakeRemote::new(clock.clone());
    Self::restart(Arc::new(MemoryStore::default()), remote, clock, config)
  }

  /// Start a manager over existing collaborators, as after a restart.
  pub fn restart(
    store: Arc<MemoryStore>,
    remote: Arc<FakeRemote>,
    clock: Arc<TestClock>,
    config: ManagerConfig,
  ) -> Self {
    let sink = Arc::new(CollectingSink::default());
    let handle = StoryManager::start(
      store.clone(),
      remote.clone(),
      clock.clone(),
      sink.clone(),
      config,
    );
    Self { handle, store, remote, sink, clock }
  }

  pub fn now(&self) -> i32 { self.clock.unix_time() }

  /// Deliver a story the way a server push would, and wait for the manager
  /// to have processed it.
  pub async fn push_story(&self, owner: OwnerId, story: FullStory) {
    self.handle.apply_story(owner, RemoteStory::Full(story));
    self.settle().await;
  }

  /// Wait until everything queued so far has been handled.
  pub async fn settle(&self) { self.handle.get_current_state().await.unwrap(); }
}

pub(crate) fn draft(file: i64, caption: &str) -> StoryDraft {
  StoryDraft {
    content:       StoryContent::photo(FileId(file)),
    caption:       Caption::plain(caption),
    privacy:       PrivacyRules::everyone(),
    active_period: DAY,
    is_pinned:     false,
    noforwards:    false,
  }
}

pub(crate) fn key(owner: OwnerId, story_id: i32) -> StoryKey {
  StoryKey::new(owner, StoryId(story_id))
}

/// Let spawned calls finish; the paused clock makes this instant.
pub(crate) async fn idle() { tokio::time::sleep(Duration::from_secs(1)).await; }

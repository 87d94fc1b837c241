//! Everything the actor reacts to: caller commands, completions of spawned
//! network calls and timer expiries.

use story_core::{
  ids::{ContextId, FileId, GlobalId, LogEventId, OwnerId, StoryId, StoryKey, StoryListId},
  pending::PendingStory,
  remote::{
    AllStories, FullStory, InputFile, OwnerStories, RemoteError, RemoteStory, ReportReason,
    StoriesPage, UploadOutcome, ViewersPage,
  },
  store::ActiveListPage,
  story::{Caption, InteractionInfo, PrivacyRules, StoryContent},
  update::{ActiveStoriesView, StoriesView, StoryView, Update, ViewersView},
  viewers::StoryViewer,
};

use crate::{
  Error,
  handle::{SentStory, StoryDraft},
  promise::Promise,
};

// ─── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum Command {
  GetStory {
    key:        StoryKey,
    only_local: bool,
    reply:      Promise<Option<StoryView>>,
  },
  GetOwnerExpiringStories {
    owner: OwnerId,
    reply: Promise<ActiveStoriesView>,
  },
  LoadActiveStories {
    list:  StoryListId,
    reply: Promise<()>,
  },
  /// Refetch the first page of both lists, e.g. after reconnecting.
  ReloadActiveStories,
  ToggleOwnerHidden {
    owner:  OwnerId,
    hidden: bool,
    reply:  Promise<()>,
  },
  /// Directory facts about the owner changed; recompute its order.
  OwnerUpdated { owner: OwnerId },
  GetPinnedStories {
    owner: OwnerId,
    from:  StoryId,
    limit: i32,
    reply: Promise<StoriesView>,
  },
  GetStoryArchive {
    from:  StoryId,
    limit: i32,
    reply: Promise<StoriesView>,
  },
  GetStoryViewers {
    story_id: StoryId,
    offset:   StoryViewer,
    limit:    i32,
    reply:    Promise<ViewersView>,
  },
  ReportStory {
    key:    StoryKey,
    reason: ReportReason,
    reply:  Promise<()>,
  },
  OpenStory { key: StoryKey, reply: Promise<()> },
  CloseStory { key: StoryKey, reply: Promise<()> },
  ViewReference { key: StoryKey },
  StoryReplied { key: StoryKey, replier: OwnerId },
  RegisterReference { key: StoryKey, context: ContextId },
  UnregisterReference { key: StoryKey, context: ContextId },
  SendStory { draft: StoryDraft, reply: Promise<SentStory> },
  EditStory {
    story_id: StoryId,
    content:  Option<StoryContent>,
    caption:  Option<Caption>,
    reply:    Promise<()>,
  },
  EditStoryPrivacy {
    story_id: StoryId,
    privacy:  PrivacyRules,
    reply:    Promise<()>,
  },
  ToggleStoryPinned {
    story_id:  StoryId,
    is_pinned: bool,
    reply:     Promise<()>,
  },
  DeleteStory { story_id: StoryId, reply: Promise<()> },
  /// A story pushed by the server.
  ApplyStory { owner: OwnerId, story: RemoteStory },
  /// A read watermark pushed by the server.
  ApplyReadStories { owner: OwnerId, max_read_story_id: StoryId },
  GetCurrentState { reply: Promise<Vec<Update>> },
  Shutdown { reply: Promise<()> },
}

// ─── Timers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
  /// A story's active status may have flipped.
  Expire(GlobalId),
  /// A story's viewer list may have become unavailable.
  ViewersExpire(GlobalId),
  /// An opened story is due for a reload.
  Reload(GlobalId),
  InteractionUpdate,
  ExpiredSweep,
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum Event {
  Command(Command),
  Timer {
    key:   TimerKey,
    token: u64,
  },
  ListDbPageLoaded {
    list:   StoryListId,
    result: Result<ActiveListPage, Error>,
  },
  ListPageLoaded {
    list:    StoryListId,
    is_next: bool,
    result:  Result<AllStories, RemoteError>,
  },
  StoriesReloaded {
    owner:     OwnerId,
    story_ids: Vec<StoryId>,
    result:    Result<StoriesPage, RemoteError>,
  },
  ExpiringLoaded {
    owner:  OwnerId,
    result: Result<Option<OwnerStories>, RemoteError>,
  },
  PageLoaded {
    owner:  OwnerId,
    result: Result<StoriesPage, RemoteError>,
    reply:  Promise<StoriesView>,
  },
  Uploaded {
    token:  u64,
    result: Result<UploadOutcome, RemoteError>,
  },
  SendDone {
    pending: PendingStory,
    file:    InputFile,
    result:  Result<FullStory, RemoteError>,
  },
  EditDone {
    pending: PendingStory,
    file:    Option<FileId>,
    result:  Result<FullStory, RemoteError>,
  },
  DeleteDone {
    key:          StoryKey,
    log_event_id: Option<LogEventId>,
    result:       Result<(), RemoteError>,
    reply:        Promise<()>,
  },
  ReadDone {
    owner:        OwnerId,
    log_event_id: Option<LogEventId>,
    result:       Result<(), RemoteError>,
  },
  ViewsIncremented {
    owner:  OwnerId,
    result: Result<(), RemoteError>,
  },
  ViewersLoaded {
    key:    StoryKey,
    offset: StoryViewer,
    result: Result<ViewersPage, RemoteError>,
    reply:  Promise<ViewersView>,
  },
  InteractionLoaded {
    story_ids: Vec<StoryId>,
    result:    Result<Vec<InteractionInfo>, RemoteError>,
  },
  PinnedToggled {
    key:       StoryKey,
    is_pinned: bool,
    result:    Result<(), RemoteError>,
    reply:     Promise<()>,
  },
  OwnerHiddenToggled {
    owner:  OwnerId,
    hidden: bool,
    result: Result<(), RemoteError>,
    reply:  Promise<()>,
  },
  /// A remote call whose only effect is its reply.
  RemoteDone {
    result: Result<(), RemoteError>,
    reply:  Promise<()>,
  },
}

//! Contracts with the network, the media uploader and the user directory.
//!
//! Every network call is one async operation returning a typed result or a
//! [`RemoteError`]. The manager matches on the error; there are no per-call
//! handler objects.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  ids::{FileId, OwnerId, StoryId, StoryKey, StoryListId},
  pending::PendingOrder,
  story::{Caption, InteractionInfo, PrivacyRules, StoryContent, StoryInfo},
  viewers::{StoryViewer, ViewerList},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// A failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
  /// The edit changed nothing. Treated as success.
  #[error("story not modified")]
  NotModified,

  /// The server is missing these parts of an uploaded file.
  #[error("file parts missing: {0:?}")]
  FilePartsMissing(Vec<i32>),

  #[error("{code}: {message}")]
  Rpc { code: i32, message: String },

  #[error("transport error: {0}")]
  Transport(String),
}

impl RemoteError {
  pub fn rpc(code: i32, message: impl Into<String>) -> Self {
    Self::Rpc { code, message: message.into() }
  }
}

// ─── Received records ────────────────────────────────────────────────────────

/// A complete story record as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullStory {
  pub id:                       StoryId,
  pub date:                     i32,
  pub expire_date:              i32,
  pub is_edited:                bool,
  pub is_pinned:                bool,
  pub is_public:                bool,
  pub is_for_close_friends:     bool,
  pub is_for_contacts:          bool,
  pub is_for_selected_contacts: bool,
  pub noforwards:               bool,
  /// A reduced record: privacy and interaction info are absent and must not
  /// overwrite cached values.
  pub min:                      bool,
  pub privacy:                  PrivacyRules,
  pub interaction:              InteractionInfo,
  /// `None` when the media could not be interpreted.
  pub content:                  Option<StoryContent>,
  pub caption:                  Caption,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteStory {
  Full(FullStory),
  /// Only the dates are known; creates a placeholder.
  Skipped(StoryInfo),
  Deleted { id: StoryId },
}

/// The active stories of one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerStories {
  pub owner:             OwnerId,
  pub max_read_story_id: StoryId,
  pub stories:           Vec<RemoteStory>,
}

/// One page of a story list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllStories {
  NotModified {
    state: String,
  },
  Page {
    state:       String,
    total_count: i32,
    has_more:    bool,
    owners:      Vec<OwnerStories>,
  },
}

/// A page of stories of one owner: by id, pinned or archived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoriesPage {
  pub total_count: i32,
  pub stories:     Vec<RemoteStory>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewersPage {
  pub total_count: i32,
  pub viewers:     ViewerList,
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// A file ready to be attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
  pub file:  FileId,
  pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendStoryRequest {
  pub random_id:  i64,
  pub file:       InputFile,
  pub content:    StoryContent,
  pub caption:    Caption,
  pub privacy:    PrivacyRules,
  pub period:     i32,
  pub is_pinned:  bool,
  pub noforwards: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditStoryRequest {
  pub story_id: StoryId,
  /// Present exactly when the content is replaced.
  pub file:     Option<InputFile>,
  pub content:  Option<StoryContent>,
  pub caption:  Option<Caption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
  Spam,
  Violence,
  Pornography,
  ChildAbuse,
  Copyright,
  IllegalDrugs,
  PersonalDetails,
  Other(String),
}

// ─── Network ─────────────────────────────────────────────────────────────────

/// The story RPC surface. Transport, retries and encoding live behind it.
pub trait StoryNetwork: Send + Sync {
  /// Fetch a page of a story list. `is_next` continues from `state`.
  fn get_all_stories(
    &self,
    list: StoryListId,
    is_next: bool,
    state: String,
  ) -> impl Future<Output = Result<AllStories, RemoteError>> + Send + '_;

  /// Move an owner between the main and archive lists.
  fn toggle_owner_hidden(
    &self,
    owner: OwnerId,
    hidden: bool,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send + '_;

  fn get_stories_by_id(
    &self,
    owner: OwnerId,
    story_ids: Vec<StoryId>,
  ) -> impl Future<Output = Result<StoriesPage, RemoteError>> + Send + '_;

  /// Active stories of one owner; `None` when there are none.
  fn get_owner_stories(
    &self,
    owner: OwnerId,
  ) -> impl Future<Output = Result<Option<OwnerStories>, RemoteError>> + Send + '_;

  fn get_pinned_stories(
    &self,
    owner: OwnerId,
    from: StoryId,
    limit: i32,
  ) -> impl Future<Output = Result<StoriesPage, RemoteError>> + Send + '_;

  fn get_story_archive(
    &self,
    from: StoryId,
    limit: i32,
  ) -> impl Future<Output = Result<StoriesPage, RemoteError>> + Send + '_;

  /// Create a story and return it as stored by the server.
  fn send_story(
    &self,
    request: SendStoryRequest,
  ) -> impl Future<Output = Result<FullStory, RemoteError>> + Send + '_;

  fn edit_story(
    &self,
    request: EditStoryRequest,
  ) -> impl Future<Output = Result<FullStory, RemoteError>> + Send + '_;

  fn edit_story_privacy(
    &self,
    story_id: StoryId,
    privacy: PrivacyRules,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send + '_;

  fn toggle_story_pinned(
    &self,
    story_id: StoryId,
    is_pinned: bool,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send + '_;

  fn delete_stories(
    &self,
    story_ids: Vec<StoryId>,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send + '_;

  fn increment_story_views(
    &self,
    owner: OwnerId,
    story_ids: Vec<StoryId>,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send + '_;

  fn read_stories(
    &self,
    owner: OwnerId,
    max_story_id: StoryId,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send + '_;

  fn get_story_viewers(
    &self,
    story_id: StoryId,
    offset: StoryViewer,
    limit: i32,
  ) -> impl Future<Output = Result<ViewersPage, RemoteError>> + Send + '_;

  /// Aggregate view counts, one entry per requested id in order.
  fn get_story_views(
    &self,
    story_ids: Vec<StoryId>,
  ) -> impl Future<Output = Result<Vec<InteractionInfo>, RemoteError>> + Send + '_;

  fn report_story(
    &self,
    key: StoryKey,
    reason: ReportReason,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send + '_;
}

// ─── Uploader ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
  Uploaded(InputFile),
  /// The file already lives on the server and cannot be attached as-is.
  AlreadyRemote { is_web: bool },
}

/// The media upload service. Uploads are queued by [`PendingOrder`].
pub trait MediaUploader: Send + Sync {
  /// Upload `file`. `bad_parts` restricts the upload to those parts; `[-1]`
  /// forces a full re-upload.
  fn upload(
    &self,
    file: FileId,
    bad_parts: Vec<i32>,
    order: PendingOrder,
  ) -> impl Future<Output = Result<UploadOutcome, RemoteError>> + Send + '_;

  fn cancel_upload(&self, file: FileId);

  /// Drop any partially uploaded remote copy of the file.
  fn delete_partial_upload(&self, file: FileId);

  /// Release local copies of a file that is no longer referenced.
  fn delete_file(&self, file: FileId);
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// What the story subsystem needs to know about users.
pub trait Directory: Send + Sync {
  fn my_id(&self) -> OwnerId;

  fn is_premium(&self, owner: OwnerId) -> bool;

  fn is_contact(&self, owner: OwnerId) -> bool;

  /// Whether the owner's stories are moved to the archive list.
  fn are_stories_hidden(&self, owner: OwnerId) -> bool;

  /// Record that the server moved the owner's stories to or from the
  /// archive list.
  fn set_stories_hidden(&self, owner: OwnerId, hidden: bool);

  /// Whether the owner is known and accessible.
  fn have_owner(&self, owner: OwnerId) -> bool;

  /// Force-load the given users. Returns `false` if any could not be
  /// resolved.
  fn resolve(&self, owners: &[OwnerId]) -> bool;
}

//! The `Story` entity and its value types.
//!
//! A story is merged field-by-field on every sighting, never replaced
//! wholesale. A story without content is a placeholder built from a partial
//! server record and is never surfaced to callers.

use serde::{Deserialize, Serialize};

use crate::ids::{FileId, GlobalId, OwnerId, StoryId};

// ─── Content ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
  Photo,
  Video,
  /// Media this client cannot display. Received stories may carry it; it is
  /// never accepted for sending.
  Unsupported,
}

/// The media payload of a story. Binary data lives with the uploader; only
/// the file handle is kept here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryContent {
  pub kind:        ContentKind,
  pub file:        FileId,
  /// Playback length for videos, zero for photos.
  pub duration_ms: u32,
}

impl StoryContent {
  pub fn photo(file: FileId) -> Self {
    Self { kind: ContentKind::Photo, file, duration_ms: 0 }
  }

  pub fn video(file: FileId, duration_ms: u32) -> Self {
    Self { kind: ContentKind::Video, file, duration_ms }
  }

  pub fn is_supported(&self) -> bool {
    self.kind != ContentKind::Unsupported
  }
}

// ─── Caption ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionEntity {
  pub offset: u32,
  pub length: u32,
  /// Entity type, e.g. "bold" or "mention".
  pub kind:   String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
  pub text:     String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub entities: Vec<CaptionEntity>,
}

impl Caption {
  pub fn plain(text: impl Into<String>) -> Self {
    Self { text: text.into(), entities: Vec::new() }
  }

  pub fn is_empty(&self) -> bool { self.text.is_empty() }
}

// ─── Privacy ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "users", rename_all = "snake_case")]
pub enum PrivacyRule {
  AllowAll,
  AllowContacts,
  AllowCloseFriends,
  AllowUsers(Vec<OwnerId>),
  DisallowUsers(Vec<OwnerId>),
}

/// The audience of a story as an ordered rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivacyRules(pub Vec<PrivacyRule>);

/// The coarse audience presented to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacySetting {
  Everyone,
  Contacts,
  CloseFriends,
  SelectedContacts,
}

impl PrivacyRules {
  pub fn everyone() -> Self { Self(vec![PrivacyRule::AllowAll]) }

  pub fn contacts() -> Self { Self(vec![PrivacyRule::AllowContacts]) }

  pub fn close_friends() -> Self { Self(vec![PrivacyRule::AllowCloseFriends]) }

  pub fn setting(&self) -> PrivacySetting {
    let has = |rule: &PrivacyRule| self.0.contains(rule);
    if has(&PrivacyRule::AllowAll) {
      PrivacySetting::Everyone
    } else if has(&PrivacyRule::AllowCloseFriends) {
      PrivacySetting::CloseFriends
    } else if has(&PrivacyRule::AllowContacts) {
      PrivacySetting::Contacts
    } else {
      PrivacySetting::SelectedContacts
    }
  }

  /// Users named explicitly by the rules.
  pub fn users(&self) -> impl Iterator<Item = OwnerId> + '_ {
    self
      .0
      .iter()
      .flat_map(|rule| match rule {
        PrivacyRule::AllowUsers(users) | PrivacyRule::DisallowUsers(users) => {
          users.as_slice()
        }
        _ => &[][..],
      })
      .copied()
  }
}

// ─── Interaction info ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionInfo {
  pub view_count:        i32,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub recent_viewer_ids: Vec<OwnerId>,
}

impl InteractionInfo {
  pub fn is_empty(&self) -> bool {
    self.view_count == 0 && self.recent_viewer_ids.is_empty()
  }

  /// Raise the view count. Returns `true` if it changed; a lower count is
  /// ignored.
  pub fn set_view_count(&mut self, view_count: i32) -> bool {
    if view_count > self.view_count {
      self.view_count = view_count;
      return true;
    }
    false
  }

  /// `true` when every viewer is known and `viewer` is not among them.
  pub fn definitely_lacks_viewer(&self, viewer: OwnerId) -> bool {
    usize::try_from(self.view_count).ok() == Some(self.recent_viewer_ids.len())
      && !self.recent_viewer_ids.contains(&viewer)
  }
}

// ─── Story ───────────────────────────────────────────────────────────────────

/// A story as cached in memory and persisted to the database.
///
/// `global_id` and `update_sent` are process-local and skipped by serde.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
  pub date:                     i32,
  pub expire_date:              i32,
  pub receive_date:             i32,
  pub is_pinned:                bool,
  pub is_edited:                bool,
  pub is_public:                bool,
  pub is_for_close_friends:     bool,
  pub is_for_contacts:          bool,
  pub is_for_selected_contacts: bool,
  pub noforwards:               bool,
  pub privacy:                  PrivacyRules,
  pub interaction:              InteractionInfo,
  pub content:                  Option<StoryContent>,
  pub caption:                  Caption,
  #[serde(skip)]
  pub global_id:                GlobalId,
  #[serde(skip)]
  pub update_sent:              bool,
}

impl Story {
  pub fn is_active(&self, now: i32) -> bool { now < self.expire_date }

  /// Placeholders carry only dates and must never be surfaced.
  pub fn is_placeholder(&self) -> bool { self.content.is_none() }

  pub fn viewers_expire_date(&self, expiration_delay: i32) -> i32 {
    self.expire_date.saturating_add(expiration_delay)
  }

  pub fn file(&self) -> Option<FileId> {
    self.content.as_ref().map(|c| c.file)
  }

  /// Users this story refers to and who must be resolvable before the
  /// story is used.
  pub fn dependencies(&self) -> Vec<OwnerId> {
    let mut owners: Vec<OwnerId> = self
      .privacy
      .users()
      .chain(self.interaction.recent_viewer_ids.iter().copied())
      .collect();
    owners.sort_unstable();
    owners.dedup();
    owners
  }

  pub fn info(&self, story_id: StoryId) -> StoryInfo {
    StoryInfo {
      story_id,
      date: self.date,
      expire_date: self.expire_date,
      is_for_close_friends: self.is_for_close_friends,
    }
  }
}

/// The minimal record kept for each active story of an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryInfo {
  pub story_id:             StoryId,
  pub date:                 i32,
  pub expire_date:          i32,
  pub is_for_close_friends: bool,
}

/// Repair server dates: a non-positive send date becomes 1, and an expiry
/// not after the send date becomes `date + 1`. The flag reports whether
/// anything was repaired.
pub fn clamp_dates(date: i32, expire_date: i32) -> (i32, i32, bool) {
  let mut repaired = false;
  let date = if date <= 0 {
    repaired = true;
    1
  } else {
    date
  };
  let expire_date = if expire_date <= date {
    repaired = true;
    date.saturating_add(1)
  } else {
    expire_date
  };
  (date, expire_date, repaired)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Story {
    Story {
      date: 1000,
      expire_date: 87_400,
      receive_date: 1001,
      is_pinned: true,
      is_public: true,
      privacy: PrivacyRules(vec![
        PrivacyRule::AllowAll,
        PrivacyRule::DisallowUsers(vec![OwnerId(9)]),
      ]),
      interaction: InteractionInfo {
        view_count:        2,
        recent_viewer_ids: vec![OwnerId(4), OwnerId(9)],
      },
      content: Some(StoryContent::video(FileId(77), 1500)),
      caption: Caption::plain("hello"),
      global_id: GlobalId(12),
      update_sent: true,
      ..Story::default()
    }
  }

  #[test]
  fn serde_drops_only_transient_fields() {
    let story = sample();
    let json = serde_json::to_string(&story).unwrap();
    assert!(!json.contains("global_id"));
    assert!(!json.contains("update_sent"));

    let parsed: Story = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.global_id, GlobalId::default());
    assert!(!parsed.update_sent);
    assert_eq!(
      parsed,
      Story { global_id: GlobalId::default(), update_sent: false, ..story }
    );
  }

  #[test]
  fn dates_are_clamped() {
    assert_eq!(clamp_dates(0, 0), (1, 2, true));
    assert_eq!(clamp_dates(100, 100), (100, 101, true));
    assert_eq!(clamp_dates(100, 200), (100, 200, false));
  }

  #[test]
  fn view_count_only_increases() {
    let mut info = InteractionInfo { view_count: 5, ..Default::default() };
    assert!(!info.set_view_count(3));
    assert_eq!(info.view_count, 5);
    assert!(info.set_view_count(6));
    assert_eq!(info.view_count, 6);
  }

  #[test]
  fn dependencies_are_deduplicated() {
    assert_eq!(sample().dependencies(), vec![OwnerId(4), OwnerId(9)]);
  }

  #[test]
  fn privacy_setting_prefers_widest_audience() {
    assert_eq!(PrivacyRules::everyone().setting(), PrivacySetting::Everyone);
    assert_eq!(
      PrivacyRules(vec![PrivacyRule::AllowUsers(vec![OwnerId(1)])]).setting(),
      PrivacySetting::SelectedContacts
    );
  }
}

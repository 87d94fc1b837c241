//! Durable intents: what must be finished after a restart.
//!
//! Each record carries exactly the fields needed to resume its operation.
//! Records are appended before the matching network request is sent and
//! erased once it completes.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  ids::{LogEventId, OwnerId, StoryId, StoryKey},
  pending::PendingStory,
  story::Caption,
};

/// The payload of one intent log record. The variant name is the `kind`
/// discriminant stored next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Intent {
  /// Delete an owned story on the server.
  DeleteOnServer { key: StoryKey },
  /// Push a read watermark to the server.
  ReadOnServer {
    owner:        OwnerId,
    max_story_id: StoryId,
  },
  /// Fetch an owner's active stories.
  LoadExpiring { owner: OwnerId },
  /// Create a story.
  Send { pending: PendingStory },
  /// Edit the content and/or caption of a story.
  Edit {
    pending:      PendingStory,
    edit_caption: bool,
    #[serde(default)]
    caption:      Caption,
  },
}

impl Intent {
  /// The discriminant string stored in the `kind` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::DeleteOnServer { .. } => "delete_on_server",
      Self::ReadOnServer { .. } => "read_on_server",
      Self::LoadExpiring { .. } => "load_expiring",
      Self::Send { .. } => "send",
      Self::Edit { .. } => "edit",
    }
  }

  /// Serialise the inner payload (without the type tag).
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("data").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Deserialise from the discriminant string and JSON payload.
  pub fn from_parts(discriminant: &str, data: serde_json::Value) -> Result<Self> {
    if !KINDS.contains(&discriminant) {
      return Err(Error::UnknownIntentKind(discriminant.to_owned()));
    }
    let wrapped = serde_json::json!({ "type": discriminant, "data": data });
    Ok(serde_json::from_value(wrapped)?)
  }
}

const KINDS: [&str; 5] =
  ["delete_on_server", "read_on_server", "load_expiring", "send", "edit"];

/// A raw record as read back from the log. Decoding is left to the caller so
/// that one corrupt record does not prevent the rest from replaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRecord {
  pub id:      LogEventId,
  pub kind:    String,
  /// The JSON payload as stored; it may not parse.
  pub payload: String,
}

impl IntentRecord {
  pub fn new(id: LogEventId, intent: &Intent) -> Result<Self> {
    Ok(Self {
      id,
      kind: intent.discriminant().to_owned(),
      payload: intent.to_json()?.to_string(),
    })
  }

  pub fn decode(&self) -> Result<Intent> {
    let data = serde_json::from_str(&self.payload)?;
    Intent::from_parts(&self.kind, data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::story::Story;

  #[test]
  fn parts_round_trip() {
    let intent = Intent::ReadOnServer {
      owner:        OwnerId(5),
      max_story_id: StoryId(8),
    };
    let data = intent.to_json().unwrap();
    assert_eq!(data["max_story_id"], 8);
    let parsed = Intent::from_parts(intent.discriminant(), data).unwrap();
    assert_eq!(parsed, intent);
  }

  #[test]
  fn unknown_kind_is_rejected() {
    let err = Intent::from_parts("forward", serde_json::json!({})).unwrap_err();
    assert!(matches!(err, Error::UnknownIntentKind(kind) if kind == "forward"));
  }

  #[test]
  fn edit_without_caption_defaults_it() {
    let pending = PendingStory::new_edit(
      StoryKey::new(OwnerId(1), StoryId(2)),
      1,
      1,
      Story::default(),
    );
    let mut data = Intent::Edit {
      pending,
      edit_caption: false,
      caption: Caption::default(),
    }
    .to_json()
    .unwrap();
    data.as_object_mut().unwrap().remove("caption");
    let parsed = Intent::from_parts("edit", data).unwrap();
    assert!(matches!(parsed, Intent::Edit { edit_caption: false, .. }));
  }

  #[test]
  fn unparsable_payload_fails_only_its_record() {
    let good = IntentRecord::new(LogEventId(1), &Intent::LoadExpiring { owner: OwnerId(4) })
      .unwrap();
    let bad = IntentRecord {
      id:      LogEventId(2),
      kind:    "load_expiring".to_owned(),
      payload: "{not json".to_owned(),
    };
    assert!(matches!(bad.decode(), Err(Error::Serialization(_))));
    assert_eq!(good.decode().unwrap(), Intent::LoadExpiring { owner: OwnerId(4) });
  }
}

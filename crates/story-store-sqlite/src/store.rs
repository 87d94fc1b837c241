//! [`SqliteStore`]: the SQLite implementation of [`StoryDatabase`] and
//! [`IntentLog`].

use std::path::Path;

use rusqlite::OptionalExtension as _;

use story_core::{
  active::ListPosition,
  ids::{LogEventId, OwnerId, StoryKey, StoryListId},
  intent::{Intent, IntentRecord},
  store::{ActiveListPage, IntentLog, StoryDatabase, StoredStory},
};

use crate::{
  Error, Result,
  encode::{
    RawActiveRow, RawIntent, RawStory, decode_list, encode_expires_at,
    encode_list, encode_log_event_id,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Story persistence backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Row counts, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
  pub stories:       u64,
  pub expiring:      u64,
  pub active_owners: u64,
  pub intents:       u64,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn stats(&self) -> Result<StoreStats> {
    let stats = self
      .conn
      .call(|conn| {
        let count = |sql: &str| -> rusqlite::Result<u64> {
          conn.query_row(sql, [], |r| r.get::<_, i64>(0)).map(|n| n.max(0) as u64)
        };
        Ok(StoreStats {
          stories:       count("SELECT COUNT(*) FROM stories")?,
          expiring:      count(
            "SELECT COUNT(*) FROM stories WHERE expires_at IS NOT NULL",
          )?,
          active_owners: count("SELECT COUNT(*) FROM active_stories")?,
          intents:       count("SELECT COUNT(*) FROM intents")?,
        })
      })
      .await?;
    Ok(stats)
  }
}

// ─── StoryDatabase impl ──────────────────────────────────────────────────────

impl StoryDatabase for SqliteStore {
  type Error = Error;

  async fn get_story(&self, key: StoryKey) -> Result<Option<Vec<u8>>> {
    let data = self
      .conn
      .call(move |conn| {
        let data = conn
          .query_row(
            "SELECT data FROM stories WHERE owner_id = ?1 AND story_id = ?2",
            rusqlite::params![key.owner.0, key.story_id.0],
            |r| r.get::<_, Vec<u8>>(0),
          )
          .optional()?;
        Ok(data)
      })
      .await?;
    Ok(data)
  }

  async fn put_story(
    &self,
    key: StoryKey,
    expires_at: i32,
    data: Vec<u8>,
  ) -> Result<()> {
    let expires_at = encode_expires_at(expires_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO stories (owner_id, story_id, expires_at, data)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (owner_id, story_id)
           DO UPDATE SET expires_at = excluded.expires_at, data = excluded.data",
          rusqlite::params![key.owner.0, key.story_id.0, expires_at, data],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_story(&self, key: StoryKey) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM stories WHERE owner_id = ?1 AND story_id = ?2",
          rusqlite::params![key.owner.0, key.story_id.0],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_expiring_stories(
    &self,
    before: i32,
    limit: u32,
  ) -> Result<Vec<StoredStory>> {
    let rows: Vec<RawStory> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT owner_id, story_id, data FROM stories
           WHERE expires_at IS NOT NULL AND expires_at <= ?1
           ORDER BY expires_at, owner_id, story_id
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![before, limit], |r| {
            Ok(RawStory {
              owner_id: r.get(0)?,
              story_id: r.get(1)?,
              data:     r.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows.into_iter().map(RawStory::into_stored).collect())
  }

  async fn get_active_stories(&self, owner: OwnerId) -> Result<Option<Vec<u8>>> {
    let data = self
      .conn
      .call(move |conn| {
        let data = conn
          .query_row(
            "SELECT data FROM active_stories WHERE owner_id = ?1",
            rusqlite::params![owner.0],
            |r| r.get::<_, Vec<u8>>(0),
          )
          .optional()?;
        Ok(data)
      })
      .await?;
    Ok(data)
  }

  async fn put_active_stories(
    &self,
    owner: OwnerId,
    list: Option<StoryListId>,
    order: i64,
    data: Vec<u8>,
  ) -> Result<()> {
    let list_str = list.map(encode_list);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO active_stories (owner_id, list_id, story_order, data)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (owner_id)
           DO UPDATE SET list_id = excluded.list_id,
                         story_order = excluded.story_order,
                         data = excluded.data",
          rusqlite::params![owner.0, list_str, order, data],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_active_stories(&self, owner: OwnerId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM active_stories WHERE owner_id = ?1",
          rusqlite::params![owner.0],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_active_story_list_page(
    &self,
    list: StoryListId,
    after: ListPosition,
    limit: u32,
  ) -> Result<ActiveListPage> {
    let list_str = encode_list(list);
    let rows: Vec<RawActiveRow> = self
      .conn
      .call(move |conn| {
        // Lists run in descending (order, owner); "after" means smaller.
        let mut stmt = conn.prepare(
          "SELECT owner_id, story_order, data FROM active_stories
           WHERE list_id = ?1
             AND (story_order < ?2 OR (story_order = ?2 AND owner_id < ?3))
           ORDER BY story_order DESC, owner_id DESC
           LIMIT ?4",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![list_str, after.order, after.owner.0, limit],
            |r| {
              Ok(RawActiveRow {
                owner_id:    r.get(0)?,
                story_order: r.get(1)?,
                data:        r.get(2)?,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let next = rows.last().map(RawActiveRow::position).unwrap_or(after);
    Ok(ActiveListPage {
      owners: rows
        .into_iter()
        .map(|row| (OwnerId(row.owner_id), row.data))
        .collect(),
      next,
    })
  }

  async fn get_story_list_state(&self, list: StoryListId) -> Result<Option<Vec<u8>>> {
    let list_str = encode_list(list);
    let data = self
      .conn
      .call(move |conn| {
        let data = conn
          .query_row(
            "SELECT data FROM story_list_state WHERE list_id = ?1",
            rusqlite::params![list_str],
            |r| r.get::<_, Vec<u8>>(0),
          )
          .optional()?;
        Ok(data)
      })
      .await?;
    Ok(data)
  }

  async fn put_story_list_state(&self, list: StoryListId, data: Vec<u8>) -> Result<()> {
    let list_str = encode_list(list);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO story_list_state (list_id, data) VALUES (?1, ?2)
           ON CONFLICT (list_id) DO UPDATE SET data = excluded.data",
          rusqlite::params![list_str, data],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── IntentLog impl ──────────────────────────────────────────────────────────

impl IntentLog for SqliteStore {
  type Error = Error;

  async fn append(&self, intent: Intent) -> Result<LogEventId> {
    let kind = intent.discriminant();
    let payload = intent.to_json()?.to_string();
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO intents (kind, payload) VALUES (?1, ?2)",
          rusqlite::params![kind, payload],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    tracing::trace!(log_event_id = id, kind, "intent appended");
    Ok(LogEventId(u64::try_from(id).unwrap_or_default()))
  }

  async fn rewrite(&self, id: LogEventId, intent: Intent) -> Result<LogEventId> {
    let old = encode_log_event_id(id);
    let kind = intent.discriminant();
    let payload = intent.to_json()?.to_string();
    let new_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM intents WHERE log_event_id = ?1",
          rusqlite::params![old],
        )?;
        tx.execute(
          "INSERT INTO intents (kind, payload) VALUES (?1, ?2)",
          rusqlite::params![kind, payload],
        )?;
        let new_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(new_id)
      })
      .await?;
    tracing::trace!(old = old, log_event_id = new_id, kind, "intent rewritten");
    Ok(LogEventId(u64::try_from(new_id).unwrap_or_default()))
  }

  async fn erase(&self, id: LogEventId) -> Result<()> {
    let id = encode_log_event_id(id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM intents WHERE log_event_id = ?1",
          rusqlite::params![id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn replay_all(&self) -> Result<Vec<IntentRecord>> {
    let rows: Vec<RawIntent> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT log_event_id, kind, payload FROM intents ORDER BY log_event_id",
        )?;
        let rows = stmt
          .query_map([], |r| {
            Ok(RawIntent {
              log_event_id: r.get(0)?,
              kind:         r.get(1)?,
              payload:      r.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows.into_iter().map(RawIntent::into_record).collect())
  }
}

impl SqliteStore {
  /// Insert a row as-is, bypassing serialisation.
  #[cfg(test)]
  pub(crate) async fn insert_raw_intent(&self, kind: &'static str, payload: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO intents (kind, payload) VALUES (?1, ?2)",
          rusqlite::params![kind, payload],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The lists that currently hold at least one owner.
  pub async fn lists_in_use(&self) -> Result<Vec<StoryListId>> {
    let names: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT list_id FROM active_stories
           WHERE list_id IS NOT NULL ORDER BY list_id DESC",
        )?;
        let names = stmt
          .query_map([], |r| r.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
      })
      .await?;
    names.iter().map(|name| decode_list(name)).collect()
  }
}

//! Integration tests for `SqliteStore` against an in-memory database.

use story_core::{
  active::ListPosition,
  ids::{LogEventId, OwnerId, StoryId, StoryKey, StoryListId},
  intent::Intent,
  store::{IntentLog, StoryDatabase},
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn key(owner: i64, story: i32) -> StoryKey {
  StoryKey::new(OwnerId(owner), StoryId(story))
}

// ─── Stories ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_get_delete_story() {
  let s = store().await;
  assert!(s.get_story(key(1, 2)).await.unwrap().is_none());

  s.put_story(key(1, 2), 0, b"one".to_vec()).await.unwrap();
  s.put_story(key(1, 2), 0, b"two".to_vec()).await.unwrap();
  assert_eq!(s.get_story(key(1, 2)).await.unwrap(), Some(b"two".to_vec()));

  s.delete_story(key(1, 2)).await.unwrap();
  assert!(s.get_story(key(1, 2)).await.unwrap().is_none());
}

#[tokio::test]
async fn expiring_stories_respect_cutoff_and_limit() {
  let s = store().await;
  s.put_story(key(1, 1), 100, b"a".to_vec()).await.unwrap();
  s.put_story(key(1, 2), 50, b"b".to_vec()).await.unwrap();
  s.put_story(key(2, 1), 300, b"c".to_vec()).await.unwrap();
  // Never swept.
  s.put_story(key(3, 1), 0, b"d".to_vec()).await.unwrap();

  let due = s.get_expiring_stories(200, 10).await.unwrap();
  let keys: Vec<StoryKey> = due.iter().map(|s| s.key).collect();
  assert_eq!(keys, vec![key(1, 2), key(1, 1)]);

  let due = s.get_expiring_stories(1000, 1).await.unwrap();
  assert_eq!(due.len(), 1);
  assert_eq!(due[0].key, key(1, 2));
}

#[tokio::test]
async fn overwriting_clears_expiry() {
  let s = store().await;
  s.put_story(key(1, 1), 100, b"a".to_vec()).await.unwrap();
  s.put_story(key(1, 1), 0, b"a".to_vec()).await.unwrap();
  assert!(s.get_expiring_stories(1000, 10).await.unwrap().is_empty());
}

// ─── Active stories ──────────────────────────────────────────────────────────

#[tokio::test]
async fn list_pages_run_in_descending_order() {
  let s = store().await;
  let main = Some(StoryListId::Main);
  s.put_active_stories(OwnerId(1), main, 500, b"1".to_vec()).await.unwrap();
  s.put_active_stories(OwnerId(2), main, 700, b"2".to_vec()).await.unwrap();
  s.put_active_stories(OwnerId(3), main, 700, b"3".to_vec()).await.unwrap();
  s.put_active_stories(OwnerId(4), Some(StoryListId::Archive), 900, b"4".to_vec())
    .await
    .unwrap();
  s.put_active_stories(OwnerId(5), None, 999, b"5".to_vec()).await.unwrap();

  let page = s
    .get_active_story_list_page(StoryListId::Main, ListPosition::START, 2)
    .await
    .unwrap();
  let owners: Vec<OwnerId> = page.owners.iter().map(|(o, _)| *o).collect();
  assert_eq!(owners, vec![OwnerId(3), OwnerId(2)]);
  assert_eq!(page.next, ListPosition::new(700, OwnerId(2)));

  let page = s
    .get_active_story_list_page(StoryListId::Main, page.next, 2)
    .await
    .unwrap();
  let owners: Vec<OwnerId> = page.owners.iter().map(|(o, _)| *o).collect();
  assert_eq!(owners, vec![OwnerId(1)]);

  let last = page.next;
  let page = s
    .get_active_story_list_page(StoryListId::Main, last, 2)
    .await
    .unwrap();
  assert!(page.owners.is_empty());
  assert_eq!(page.next, last);
}

#[tokio::test]
async fn moving_owner_between_lists() {
  let s = store().await;
  s.put_active_stories(OwnerId(1), Some(StoryListId::Main), 5, b"x".to_vec())
    .await
    .unwrap();
  s.put_active_stories(OwnerId(1), Some(StoryListId::Archive), 5, b"y".to_vec())
    .await
    .unwrap();

  let main = s
    .get_active_story_list_page(StoryListId::Main, ListPosition::START, 10)
    .await
    .unwrap();
  assert!(main.owners.is_empty());
  assert_eq!(s.lists_in_use().await.unwrap(), vec![StoryListId::Archive]);
  assert_eq!(
    s.get_active_stories(OwnerId(1)).await.unwrap(),
    Some(b"y".to_vec())
  );

  s.delete_active_stories(OwnerId(1)).await.unwrap();
  assert!(s.get_active_stories(OwnerId(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn list_state_round_trip() {
  let s = store().await;
  assert!(s.get_story_list_state(StoryListId::Main).await.unwrap().is_none());
  s.put_story_list_state(StoryListId::Main, b"s1".to_vec()).await.unwrap();
  s.put_story_list_state(StoryListId::Main, b"s2".to_vec()).await.unwrap();
  assert_eq!(
    s.get_story_list_state(StoryListId::Main).await.unwrap(),
    Some(b"s2".to_vec())
  );
  assert!(s.get_story_list_state(StoryListId::Archive).await.unwrap().is_none());
}

// ─── Intent log ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn intents_replay_in_append_order() {
  let s = store().await;
  let a = s
    .append(Intent::LoadExpiring { owner: OwnerId(3) })
    .await
    .unwrap();
  let b = s
    .append(Intent::DeleteOnServer { key: key(1, 9) })
    .await
    .unwrap();
  assert!(b > a);

  let records = s.replay_all().await.unwrap();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0].id, a);
  assert_eq!(
    records[0].decode().unwrap(),
    Intent::LoadExpiring { owner: OwnerId(3) }
  );
  assert_eq!(records[1].kind, "delete_on_server");
}

#[tokio::test]
async fn unparsable_row_does_not_hide_the_rest() {
  let s = store().await;
  s.append(Intent::LoadExpiring { owner: OwnerId(1) }).await.unwrap();
  s.insert_raw_intent("load_expiring", "{not json").await.unwrap();
  s.append(Intent::LoadExpiring { owner: OwnerId(2) }).await.unwrap();

  let records = s.replay_all().await.unwrap();
  assert_eq!(records.len(), 3);
  assert_eq!(records[0].decode().unwrap(), Intent::LoadExpiring { owner: OwnerId(1) });
  assert!(records[1].decode().is_err());
  assert_eq!(records[2].decode().unwrap(), Intent::LoadExpiring { owner: OwnerId(2) });

  s.erase(records[1].id).await.unwrap();
  assert_eq!(s.replay_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn rewrite_replaces_record_with_new_id() {
  let s = store().await;
  let id = s
    .append(Intent::ReadOnServer { owner: OwnerId(1), max_story_id: StoryId(2) })
    .await
    .unwrap();
  let new_id = s
    .rewrite(id, Intent::ReadOnServer {
      owner:        OwnerId(1),
      max_story_id: StoryId(5),
    })
    .await
    .unwrap();
  assert_ne!(new_id, id);

  let records = s.replay_all().await.unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].id, new_id);
  assert_eq!(
    records[0].decode().unwrap(),
    Intent::ReadOnServer { owner: OwnerId(1), max_story_id: StoryId(5) }
  );
}

#[tokio::test]
async fn erase_removes_record_and_ids_are_not_reused() {
  let s = store().await;
  let id = s
    .append(Intent::LoadExpiring { owner: OwnerId(1) })
    .await
    .unwrap();
  s.erase(id).await.unwrap();
  assert!(s.replay_all().await.unwrap().is_empty());

  // Erasing an unknown record is a no-op.
  s.erase(LogEventId(999)).await.unwrap();

  let next = s
    .append(Intent::LoadExpiring { owner: OwnerId(1) })
    .await
    .unwrap();
  assert!(next > id);
}

#[tokio::test]
async fn stats_count_rows() {
  let s = store().await;
  s.put_story(key(1, 1), 10, b"a".to_vec()).await.unwrap();
  s.put_story(key(1, 2), 0, b"b".to_vec()).await.unwrap();
  s.put_active_stories(OwnerId(1), None, 1, b"x".to_vec()).await.unwrap();
  s.append(Intent::LoadExpiring { owner: OwnerId(1) }).await.unwrap();

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.stories, 2);
  assert_eq!(stats.expiring, 1);
  assert_eq!(stats.active_owners, 1);
  assert_eq!(stats.intents, 1);
}

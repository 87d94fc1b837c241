//! The subcommands. Each reads the store and prints to stdout.

use anyhow::Context as _;
use chrono::DateTime;
use strum::IntoEnumIterator as _;

use story_core::{
  active::{ListPosition, SavedActiveStories},
  ids::{StoryKey, StoryListId},
  list::SavedStoryList,
  store::{IntentLog as _, StoryDatabase as _},
  story::Story,
};
use story_store_sqlite::SqliteStore;

fn format_time(unix: i32) -> String {
  DateTime::from_timestamp(i64::from(unix), 0)
    .map_or_else(|| unix.to_string(), |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

pub async fn stats(store: &SqliteStore) -> anyhow::Result<()> {
  let stats = store.stats().await.context("failed to count rows")?;
  println!("stories        {}", stats.stories);
  println!("  expiring     {}", stats.expiring);
  println!("active owners  {}", stats.active_owners);
  println!("intents        {}", stats.intents);
  Ok(())
}

pub async fn intents(store: &SqliteStore) -> anyhow::Result<()> {
  let records = store.replay_all().await.context("failed to read the intent log")?;
  if records.is_empty() {
    println!("no pending intents");
  }
  for record in records {
    match record.decode() {
      Ok(intent) => println!("{:>6}  {:<18} {intent:?}", record.id, record.kind),
      Err(err) => println!("{:>6}  {:<18} <corrupt: {err}>", record.id, record.kind),
    }
  }
  Ok(())
}

pub async fn lists(store: &SqliteStore) -> anyhow::Result<()> {
  let in_use = store.lists_in_use().await.context("failed to read lists")?;
  for list in StoryListId::iter() {
    let saved: Option<SavedStoryList> = match store.get_story_list_state(list).await? {
      Some(data) => Some(serde_json::from_slice(&data).context("corrupt list state")?),
      None => None,
    };
    let used = if in_use.contains(&list) { "has owners" } else { "empty" };
    match saved {
      Some(saved) => println!(
        "{list:<8} {used:<10} total={} has_more={} state={:?}",
        saved.total_count, saved.has_more, saved.state
      ),
      None => println!("{list:<8} {used:<10} never loaded"),
    }
  }
  Ok(())
}

pub async fn active(store: &SqliteStore, list: StoryListId, limit: u32) -> anyhow::Result<()> {
  let page = store
    .get_active_story_list_page(list, ListPosition::START, limit)
    .await
    .context("failed to read the list")?;
  if page.owners.is_empty() {
    println!("{list} has no owners");
  }
  for (owner, data) in page.owners {
    match serde_json::from_slice::<SavedActiveStories>(&data) {
      Ok(saved) => {
        let ids: Vec<String> = saved.stories.iter().map(|info| info.story_id.to_string()).collect();
        println!(
          "{owner:>12}  read up to {:<6} stories [{}]",
          saved.max_read_story_id,
          ids.join(", ")
        );
      }
      Err(err) => println!("{owner:>12}  <corrupt: {err}>"),
    }
  }
  Ok(())
}

pub async fn expiring(store: &SqliteStore, before: i32, limit: u32) -> anyhow::Result<()> {
  let records = store
    .get_expiring_stories(before, limit)
    .await
    .context("failed to read expiring stories")?;
  println!("{} stories expire before {}", records.len(), format_time(before));
  for record in records {
    match serde_json::from_slice::<Story>(&record.data) {
      Ok(story) => println!(
        "{:<16} posted {}  expires {}{}",
        record.key,
        format_time(story.date),
        format_time(story.expire_date),
        if story.is_pinned { "  pinned" } else { "" }
      ),
      Err(err) => println!("{:<16} <corrupt: {err}>", record.key),
    }
  }
  Ok(())
}

pub async fn story(store: &SqliteStore, key: StoryKey) -> anyhow::Result<()> {
  let Some(data) = store.get_story(key).await.context("failed to read story")? else {
    anyhow::bail!("story {key} is not stored");
  };
  let value: serde_json::Value = serde_json::from_slice(&data).context("corrupt story record")?;
  println!("{}", serde_json::to_string_pretty(&value)?);
  Ok(())
}

use std::time::Duration;

use story_core::pending::PendingKind;

use super::*;
use crate::Error;

fn send_random_id(intents: &[Intent]) -> Option<i64> {
  intents.iter().find_map(|intent| match intent {
    Intent::Send { pending } => match pending.kind {
      PendingKind::Send { random_id } => Some(random_id),
      PendingKind::Edit { .. } => None,
    },
    _ => None,
  })
}

#[tokio::test(start_paused = true)]
async fn unsent_story_is_resent_after_restart() {
  let h = Harness::start();
  // Never finishes before the shutdown.
  h.remote
    .upload_delay
    .lock()
    .unwrap()
    .insert(FileId(1), Duration::from_secs(3600));

  let sent = h.handle.send_story(draft(1, "survivor")).await.unwrap();
  let random_id = send_random_id(&h.store.intents()).unwrap();
  h.handle.shutdown().await.unwrap();
  assert_eq!(sent.completion().await.unwrap_err(), Error::Aborted);
  assert!(send_random_id(&h.store.intents()).is_some());

  let remote = FakeRemote::new(h.clock.clone());
  let h = Harness::restart(h.store.clone(), remote, h.clock.clone(), ManagerConfig::default());
  h.settle().await;
  idle().await;

  let sent = h.remote.sent.lock().unwrap().clone();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].random_id, random_id);
  assert_eq!(sent[0].caption, Caption::plain("survivor"));
  assert!(h.store.intents().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_delete_is_replayed() {
  let h = Harness::start();
  let story = h.remote.publish(ME, 7, START_TIME);
  h.push_story(ME, story).await;
  idle().await;

  // As if the delete was still in flight when the manager stopped.
  h.handle.shutdown().await.unwrap();
  assert!(h.store.intents().is_empty());
  h.store
    .append(Intent::DeleteOnServer { key: key(ME, 7) })
    .await
    .unwrap();

  let h = Harness::restart(h.store.clone(), h.remote.clone(), h.clock.clone(), ManagerConfig::default());
  h.settle().await;
  idle().await;

  assert_eq!(*h.remote.deleted.lock().unwrap(), vec![StoryId(7)]);
  assert!(h.store.intents().is_empty());
  // A story deleted by this client is never reloaded.
  assert!(h.handle.get_story(key(ME, 7), false).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn unreplayable_records_are_erased() {
  let h = Harness::start();
  h.handle.shutdown().await.unwrap();
  h.store
    .append(Intent::DeleteOnServer { key: key(FRIEND, 7) })
    .await
    .unwrap();
  h.store
    .append(Intent::ReadOnServer { owner: OwnerId(0), max_story_id: StoryId(3) })
    .await
    .unwrap();

  let h = Harness::restart(h.store.clone(), h.remote.clone(), h.clock.clone(), ManagerConfig::default());
  h.settle().await;
  assert!(h.store.intents().is_empty());
  assert!(h.remote.deleted.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn corrupt_record_does_not_stop_the_replay() {
  let h = Harness::start();
  let story = h.remote.publish(ME, 7, START_TIME);
  h.push_story(ME, story).await;
  h.handle.shutdown().await.unwrap();
  h.store.append_raw("delete_on_server", "{not json");
  h.store
    .append(Intent::DeleteOnServer { key: key(ME, 7) })
    .await
    .unwrap();
  assert_eq!(h.store.intent_count(), 2);

  let h = Harness::restart(h.store.clone(), h.remote.clone(), h.clock.clone(), ManagerConfig::default());
  h.settle().await;
  idle().await;

  assert_eq!(*h.remote.deleted.lock().unwrap(), vec![StoryId(7)]);
  assert_eq!(h.store.intent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn replaying_again_repeats_nothing() {
  let h = Harness::start();
  h.remote
    .upload_delay
    .lock()
    .unwrap()
    .insert(FileId(1), Duration::from_secs(3600));
  let story = h.remote.publish(ME, 7, START_TIME);
  h.push_story(ME, story.clone()).await;
  let _sent = h.handle.send_story(draft(1, "once")).await.unwrap();
  h.handle.shutdown().await.unwrap();
  h.store
    .append(Intent::DeleteOnServer { key: key(ME, 7) })
    .await
    .unwrap();
  assert_eq!(h.store.intents().len(), 2);

  let remote = FakeRemote::new(h.clock.clone());
  remote.server.lock().unwrap().insert(key(ME, 7), story);
  for _ in 0..2 {
    let run = Harness::restart(h.store.clone(), remote.clone(), h.clock.clone(), ManagerConfig::default());
    run.settle().await;
    idle().await;
    run.handle.shutdown().await.unwrap();
  }

  let sent = remote.sent.lock().unwrap().clone();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].caption, Caption::plain("once"));
  assert_eq!(*remote.deleted.lock().unwrap(), vec![StoryId(7)]);
  assert!(h.store.intents().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unfinished_edit_is_resumed_after_restart() {
  let h = Harness::start();
  let story = h.remote.publish(ME, 7, START_TIME);
  h.push_story(ME, story.clone()).await;
  h.remote
    .edit_delays
    .lock()
    .unwrap()
    .push_back(Duration::from_secs(3600));

  let handle = h.handle.clone();
  let edit = tokio::spawn(async move {
    handle
      .edit_story(StoryId(7), None, Some(Caption::plain("later")))
      .await
  });
  tokio::time::sleep(Duration::from_millis(100)).await;
  h.handle.shutdown().await.unwrap();
  assert_eq!(edit.await.unwrap().unwrap_err(), Error::Aborted);
  assert!(matches!(
    h.store.intents().as_slice(),
    [Intent::Edit { edit_caption: true, .. }]
  ));

  // The server never saw the edit.
  let remote = FakeRemote::new(h.clock.clone());
  remote.server.lock().unwrap().insert(key(ME, 7), story);
  let h = Harness::restart(h.store.clone(), remote, h.clock.clone(), ManagerConfig::default());
  h.settle().await;
  idle().await;

  let edits = h.remote.edits.lock().unwrap().clone();
  assert_eq!(edits.len(), 1);
  assert_eq!(edits[0].story_id, StoryId(7));
  assert_eq!(edits[0].caption, Some(Caption::plain("later")));
  assert!(edits[0].content.is_none());
  assert!(h.store.intents().is_empty());

  let view = h.handle.get_story(key(ME, 7), true).await.unwrap().unwrap();
  assert_eq!(view.caption, Caption::plain("later"));
  assert!(!view.is_being_edited);
}

#[tokio::test(start_paused = true)]
async fn edit_of_a_vanished_story_is_dropped() {
  let h = Harness::start();
  let story = h.remote.publish(ME, 7, START_TIME);
  h.push_story(ME, story).await;
  h.remote
    .edit_delays
    .lock()
    .unwrap()
    .push_back(Duration::from_secs(3600));

  let handle = h.handle.clone();
  let edit = tokio::spawn(async move {
    handle
      .edit_story(StoryId(7), None, Some(Caption::plain("later")))
      .await
  });
  tokio::time::sleep(Duration::from_millis(100)).await;
  h.handle.shutdown().await.unwrap();
  assert_eq!(edit.await.unwrap().unwrap_err(), Error::Aborted);
  h.store.delete_story(key(ME, 7)).await.unwrap();

  let remote = FakeRemote::new(h.clock.clone());
  let h = Harness::restart(h.store.clone(), remote, h.clock.clone(), ManagerConfig::default());
  h.settle().await;
  idle().await;

  assert!(h.remote.edits.lock().unwrap().is_empty());
  assert!(h.store.intents().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_without_persistence_aborts_everything() {
  let config = ManagerConfig { use_database: false, ..ManagerConfig::default() };
  let h = Harness::with_config(config);
  h.remote
    .upload_delay
    .lock()
    .unwrap()
    .insert(FileId(1), Duration::from_secs(3600));

  let sent = h.handle.send_story(draft(1, "lost")).await.unwrap();
  assert!(h.store.intents().is_empty());

  h.handle.shutdown().await.unwrap();
  assert_eq!(sent.completion().await.unwrap_err(), Error::Aborted);
  assert_eq!(
    h.handle.get_story(key(FRIEND, 5), true).await.unwrap_err(),
    Error::Aborted
  );
}

#[tokio::test(start_paused = true)]
async fn expired_sweep_removes_stale_records() {
  let h = Harness::start();
  let story = h.remote.publish(FRIEND, 5, START_TIME);
  h.push_story(FRIEND, story).await;
  h.handle.shutdown().await.unwrap();
  assert!(h.store.has_story(key(FRIEND, 5)));

  // Come back long after the story expired.
  tokio::time::sleep(Duration::from_secs(2 * u64::try_from(DAY).unwrap())).await;
  let h = Harness::restart(h.store.clone(), h.remote.clone(), h.clock.clone(), ManagerConfig::default());
  h.settle().await;
  assert!(!h.store.has_story(key(FRIEND, 5)));
}

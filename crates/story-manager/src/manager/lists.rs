//! Pagination of the two story lists.
//!
//! The database is paged first; once it is exhausted the server is. Each
//! page advances the list frontier, the position up to which the list is
//! known to be complete. Owners inside the newly covered range that the page
//! did not mention have lost their active stories.

use std::collections::HashSet;

use story_core::{
  active::ListPosition,
  ids::{OwnerId, StoryId, StoryListId},
  list::StoryList,
  remote::{AllStories, RemoteError},
  store::ActiveListPage,
  update::Update,
};

use super::{StoryManager, StoryRemote, StoryStore};
use crate::{Error, event::Event, promise::Promise};

/// Owners read from the database per page.
const DATABASE_PAGE_SIZE: u32 = 10;

impl<S: StoryStore, R: StoryRemote> StoryManager<S, R> {
  fn list(&self, list: StoryListId) -> &StoryList { &self.lists[list.index()] }

  fn list_mut(&mut self, list: StoryListId) -> &mut StoryList {
    &mut self.lists[list.index()]
  }

  /// Owners of `list` positioned in `(after, up_to]`.
  fn owners_between(
    &self,
    list: StoryListId,
    after: ListPosition,
    up_to: ListPosition,
  ) -> Vec<OwnerId> {
    self
      .list(list)
      .ordered
      .iter()
      .filter(|position| **position > after && **position <= up_to)
      .map(|position| position.owner)
      .collect()
  }

  // ─── Loading ─────────────────────────────────────────────────────────────

  pub(super) async fn load_active_stories(&mut self, list: StoryListId, reply: Promise<()>) {
    let state = self.list(list);
    if state.is_fully_loaded() {
      return reply.fail(Error::NotFound);
    }
    if state.database_has_more {
      return self.load_active_stories_from_database(list, reply);
    }
    if !state.server_has_more {
      // Everything the server had is known; walk the frontier to the end.
      let old_frontier = state.frontier;
      self.list_mut(list).frontier = ListPosition::END;
      for owner in self.owners_between(list, old_frontier, ListPosition::END) {
        self.on_owner_order_updated(owner).await;
      }
      self.update_list_count(list);
      return reply.fail(Error::NotFound);
    }
    let is_next = !state.state.is_empty();
    self.load_active_stories_from_server(list, is_next, reply);
  }

  fn load_active_stories_from_database(&mut self, list: StoryListId, reply: Promise<()>) {
    let waiters = &mut self.list_db_waiters[list.index()];
    waiters.push(reply);
    if waiters.len() != 1 {
      return;
    }

    let after = self.list(list).last_loaded_db_position;
    tracing::debug!(%list, "loading active stories from the database");
    let store = self.store.clone();
    self.spawn(async move {
      let result = store
        .get_active_story_list_page(list, after, DATABASE_PAGE_SIZE)
        .await
        .map_err(Error::storage);
      Event::ListDbPageLoaded { list, result }
    });
  }

  pub(super) fn load_active_stories_from_server(
    &mut self,
    list: StoryListId,
    is_next: bool,
    reply: Promise<()>,
  ) {
    let waiters = &mut self.list_server_waiters[list.index()];
    waiters.push(reply);
    if waiters.len() != 1 {
      return;
    }

    let state = self.list(list).state.clone();
    tracing::debug!(%list, is_next, "loading active stories from the server");
    let remote = self.remote.clone();
    self.spawn(async move {
      let result = remote.get_all_stories(list, is_next, state).await;
      Event::ListPageLoaded { list, is_next, result }
    });
  }

  pub(super) async fn on_list_db_page_loaded(
    &mut self,
    list: StoryListId,
    result: Result<ActiveListPage, Error>,
  ) {
    let waiters = std::mem::take(&mut self.list_db_waiters[list.index()]);
    let mut page = match result {
      Ok(page) => page,
      Err(err) => {
        tracing::error!(%list, error = %err, "failed to read story list page");
        return Promise::resolve_all(waiters, Err(err));
      }
    };

    let owners: Vec<OwnerId> = page.owners.iter().map(|(owner, _)| *owner).collect();
    if !self.remote.resolve(&owners) {
      // Start over from the server.
      tracing::info!(%list, "story list owners are unavailable; dropping database page");
      page.owners.clear();
      let state = self.list_mut(list);
      state.state.clear();
      state.server_has_more = true;
    }

    if page.owners.is_empty() {
      let state = self.list_mut(list);
      state.last_loaded_db_position = ListPosition::END;
      state.database_has_more = false;
    } else {
      for (owner, data) in page.owners {
        self
          .on_get_active_stories_from_database(Some(list), owner, Some(data))
          .await;
      }

      let next = page.next;
      let state = self.list(list);
      if state.last_loaded_db_position < next {
        let old_frontier = state.frontier;
        self.list_mut(list).last_loaded_db_position = next;
        if old_frontier < next {
          self.list_mut(list).frontier = next;
          let mut refreshed: HashSet<OwnerId> = HashSet::new();
          for owner in self
            .owners_between(list, old_frontier, next)
            .into_iter()
            .chain(owners)
          {
            if refreshed.insert(owner) {
              self.on_owner_order_updated(owner).await;
            }
          }
        }
      } else {
        tracing::error!(%list, "database position did not advance");
      }
      self.update_list_count(list);
    }

    Promise::resolve_all(waiters, Ok(()));
  }

  pub(super) async fn on_list_page_loaded(
    &mut self,
    list: StoryListId,
    is_next: bool,
    result: Result<AllStories, RemoteError>,
  ) {
    let waiters = std::mem::take(&mut self.list_server_waiters[list.index()]);
    let page = match result {
      Ok(page) => page,
      Err(err) => {
        tracing::info!(%list, error = %err, "failed to load story list");
        return Promise::resolve_all(waiters, Err(err.into()));
      }
    };

    match page {
      AllStories::NotModified { state } => {
        if state.is_empty() {
          tracing::error!(%list, "received an empty story list state");
        } else if self.list(list).state != state {
          self.list_mut(list).state = state;
          self.save_story_list(list).await;
        }
      }
      AllStories::Page { state, total_count, mut has_more, owners } => {
        {
          let list_state = self.list_mut(list);
          if state.is_empty() {
            tracing::error!(%list, "received an empty story list state");
          } else {
            list_state.state = state;
          }
          list_state.server_total_count = total_count.max(0);
          list_state.server_total_reloaded = true;
          if !has_more || owners.is_empty() {
            list_state.server_has_more = false;
          }
        }
        if owners.is_empty() && has_more {
          tracing::error!(%list, "received an empty page that claims to have more");
          has_more = false;
        }

        let mut max_position = ListPosition::START;
        let mut page_owners = Vec::with_capacity(owners.len());
        for stories in owners {
          let Some(owner) = self.on_get_owner_stories(None, Some(stories)).await else {
            continue;
          };
          match self.active.get(&owner) {
            Some(active) => {
              let position = active.position(owner);
              if max_position < position {
                max_position = position;
              } else {
                tracing::error!(%list, %owner, "story list page is out of order");
              }
            }
            None => tracing::error!(%list, %owner, "received an owner without active stories"),
          }
          page_owners.push(owner);
        }
        if !has_more {
          max_position = ListPosition::END;
        }

        let old_frontier = self.list(list).frontier;
        let covered_from = if is_next { old_frontier } else { ListPosition::START };
        let vanished: Vec<OwnerId> = self
          .owners_between(list, covered_from, max_position)
          .into_iter()
          .filter(|owner| !page_owners.contains(owner))
          .collect();

        if old_frontier < max_position {
          self.list_mut(list).frontier = max_position;
          for owner in &page_owners {
            self.on_owner_order_updated(*owner).await;
          }
        } else if is_next {
          tracing::error!(%list, "story list frontier did not advance");
        }

        for owner in vanished {
          tracing::debug!(%list, %owner, "owner dropped out of the story list");
          self
            .on_update_active_stories(owner, StoryId::NONE, Vec::new(), false)
            .await;
          self.load_owner_expiring(owner, None, None).await;
        }

        self.update_list_count(list);
        self.save_story_list(list).await;
      }
    }

    Promise::resolve_all(waiters, Ok(()));
  }

  // ─── Counts and state ────────────────────────────────────────────────────

  /// Dispatch the list's visible total if it differs from the last one
  /// sent.
  pub(super) fn update_list_count(&mut self, list: StoryListId) {
    let state = self.list_mut(list);
    if state.server_total_count == -1 {
      return;
    }
    let count = state.visible_total_count();
    if state.sent_total_count != count {
      state.sent_total_count = count;
      self.emit(Update::StoryListChatCount { list, count });
    }
  }

  pub(super) async fn save_story_list(&self, list: StoryListId) {
    if !self.config.use_database {
      return;
    }
    let data = match serde_json::to_vec(&self.list(list).saved()) {
      Ok(data) => data,
      Err(err) => {
        tracing::error!(%list, error = %err, "failed to serialize story list state");
        return;
      }
    };
    if let Err(err) = self.store.put_story_list_state(list, data).await {
      tracing::error!(%list, error = %err, "failed to save story list state");
    }
  }

  /// Resume list pagination from what the last run saved.
  pub(super) async fn restore_story_lists(&mut self) {
    for list in [StoryListId::Main, StoryListId::Archive] {
      let restored = match self.store.get_story_list_state(list).await {
        Ok(Some(data)) => match serde_json::from_slice(&data) {
          Ok(saved) => StoryList::restore(saved),
          Err(err) => {
            tracing::error!(%list, error = %err, "corrupt story list state");
            StoryList { database_has_more: true, ..StoryList::default() }
          }
        },
        Ok(None) => StoryList { database_has_more: true, ..StoryList::default() },
        Err(err) => {
          tracing::error!(%list, error = %err, "failed to read story list state");
          StoryList::default()
        }
      };
      *self.list_mut(list) = restored;
      self.update_list_count(list);
    }
  }
}

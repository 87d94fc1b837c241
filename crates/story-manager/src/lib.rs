//! The story engine: one actor that owns every story, active-story list and
//! pending mutation, and the handle callers use to talk to it.
//!
//! All state lives on a single task. Network calls, uploads and list page
//! reads run on spawned tasks and report back as events on the actor's
//! queue, so no lock guards the maps. Every other database and intent-log
//! call is awaited inline, which keeps writes to persistence in actor order.

pub mod config;
pub mod error;
pub mod handle;

mod event;
mod manager;
mod promise;

pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use handle::{SentStory, StoryDraft, StoryManagerHandle, StorySession};
pub use manager::{StoryManager, StoryRemote, StoryStore};

#[cfg(test)]
mod tests;

//! Core types and trait definitions for the story subsystem.
//!
//! This crate is deliberately free of runtime and database dependencies.
//! Storage backends and the manager depend on it; it depends on nothing
//! proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod active;
pub mod clock;
pub mod error;
pub mod ids;
pub mod intent;
pub mod list;
pub mod pending;
pub mod remote;
pub mod store;
pub mod story;
pub mod update;
pub mod viewers;

pub use error::{Error, Result};

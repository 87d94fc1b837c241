//! `story-inspect`: read-only views of a story database.
//!
//! Reads `config.toml` (or the path given with `--config`) and `STORY_*`
//! environment variables, opens the SQLite store and prints what the story
//! manager would find on its next start.
//!
//! # Usage
//!
//! ```
//! story-inspect intents
//! story-inspect --store ~/.local/share/stories.db active --list main
//! STORY_MANAGER__EXPIRED_STORIES_BATCH=10 story-inspect settings
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use story_core::ids::{OwnerId, StoryId, StoryKey, StoryListId};
use story_manager::ManagerConfig;
use story_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Inspect a story database")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Database file; overrides `store_path` from the configuration.
  #[arg(long, value_name = "FILE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Row counts per table.
  Stats,
  /// Intents waiting to be replayed, oldest first.
  Intents,
  /// Saved pagination state of both story lists.
  Lists,
  /// Owners with active stories, in list order.
  Active {
    #[arg(long, default_value = "main")]
    list:  StoryListId,
    #[arg(long, default_value_t = 20)]
    limit: u32,
  },
  /// Stored stories that expire before a point in time.
  Expiring {
    /// Unix time; defaults to now.
    #[arg(long)]
    before: Option<i32>,
    #[arg(long, default_value_t = 50)]
    limit:  u32,
  },
  /// One stored story as JSON.
  Story { owner: i64, story_id: i32 },
  /// The effective manager settings.
  Settings,
}

// ─── Config file ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InspectConfig {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  manager:    ManagerConfig,
}

fn default_store_path() -> PathBuf { PathBuf::from("stories.db") }

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("STORY").separator("__"))
    .build()
    .context("failed to read config file")?;
  let cfg: InspectConfig = settings
    .try_deserialize()
    .context("failed to deserialise configuration")?;

  if let Command::Settings = cli.command {
    println!("{:#?}", cfg.manager);
    return Ok(());
  }

  let store_path = expand_tilde(cli.store.as_deref().unwrap_or(&cfg.store_path));
  tracing::debug!(path = %store_path.display(), "opening story store");
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Stats => commands::stats(&store).await,
    Command::Intents => commands::intents(&store).await,
    Command::Lists => commands::lists(&store).await,
    Command::Active { list, limit } => commands::active(&store, list, limit).await,
    Command::Expiring { before, limit } => {
      let before = match before {
        Some(before) => before,
        None => i32::try_from(chrono::Utc::now().timestamp()).context("clock out of range")?,
      };
      commands::expiring(&store, before, limit).await
    }
    Command::Story { owner, story_id } => {
      commands::story(&store, StoryKey::new(OwnerId(owner), StoryId(story_id))).await
    }
    Command::Settings => Ok(()),
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

//! Dubwatch - English dub tracking for anime watch-lists.
//!
//! This library provides:
//! - A per-origin rate-limit-aware request dispatcher
//! - Dub resolution against the AnimeSchedule API and site
//! - Watch-list reconciliation against AniList
//! - A daily sweep that reports dubs which finished airing

pub mod cache;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod notifier;
pub mod reconciler;
pub mod resolver;
pub mod store;
pub mod tracker;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use console::Console;
pub use error::{ConfigError, DispatchError, NotifyError, ResolveError, StoreError, SyncError};
pub use models::{DubRecord, DubState, NotificationEvent, Title, TitleId, User, UserId};
pub use store::{JsonStore, MemoryStore, Store};
pub use tracker::{DubStatus, DubTracker, TrackerDeps};

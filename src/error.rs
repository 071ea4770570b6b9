//! Error types for the dub tracking engine.
//!
//! Uses `thiserror` for structured error definitions. Each concern gets its
//! own enum so callers can tell a spent rate-limit budget apart from a title
//! that simply isn't on the schedule site yet.

use crate::models::{TitleId, UserId};
use thiserror::Error;

/// Errors raised by the request dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The transport failed before a response arrived (DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The URL could not be parsed or has no host.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Every retry after a 429 was also rate limited.
    #[error("Rate limit exhausted for {origin} after {attempts} attempts")]
    RateLimitExhausted { origin: String, attempts: u32 },
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Transport(err.to_string())
    }
}

/// Errors raised while resolving a title's dub status.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The schedule search returned no candidates.
    #[error("No schedule entry found for title {0}")]
    NotFound(TitleId),

    /// Several candidates matched and none fit the title's episode count.
    #[error("{candidates} schedule entries match title {title_id}, none disambiguated")]
    Ambiguous { title_id: TitleId, candidates: usize },

    /// An upstream answered with a non-success status.
    #[error("Upstream {upstream} returned HTTP {status}")]
    Upstream { upstream: &'static str, status: u16 },

    /// An upstream body did not have the expected shape.
    #[error("Failed to parse upstream response: {0}")]
    Parse(String),

    /// The dispatcher gave up after repeated 429s.
    #[error("Rate limit exhausted for {origin} after {attempts} attempts")]
    RateLimitExhausted { origin: String, attempts: u32 },

    /// The request never produced a response.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The title's resolution took longer than allowed.
    #[error("Resolution of title {0} timed out")]
    Timeout(TitleId),

    /// Writing the resolved record failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DispatchError> for ResolveError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::RateLimitExhausted { origin, attempts } => {
                ResolveError::RateLimitExhausted { origin, attempts }
            }
            DispatchError::Transport(msg) | DispatchError::InvalidUrl(msg) => {
                ResolveError::Transport(msg)
            }
        }
    }
}

/// Errors raised while reconciling a user's list.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No such user in the store.
    #[error("Unknown user {0}")]
    UnknownUser(UserId),

    /// The remote watch-list could not be fetched; nothing was changed.
    #[error("Failed to fetch watch-list for user {user_id}: {source}")]
    WatchList {
        user_id: UserId,
        #[source]
        source: ResolveError,
    },

    /// The store failed while reading the user's subscriptions.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by a persistence adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read or write the backing file.
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing document is not valid JSON for the store layout.
    #[error("Store document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors raised when delivering a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The transport could not deliver the message.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The dispatcher gave up on the delivery request.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Missing required configuration value
    #[error("Missing required config value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

//! Upstream sources and the traits the engine consumes them through.
//!
//! Two upstreams feed the engine: the GraphQL list site (watch-lists and
//! title metadata) and the schedule site (structured search plus an HTML
//! page per title). Both go through the shared [`Dispatcher`].
//!
//! [`Dispatcher`]: crate::dispatcher::Dispatcher

mod anilist;
mod animeschedule;

pub use anilist::AnilistClient;
pub use animeschedule::{AnimeScheduleClient, DubMarker, ScheduleCandidate, parse_dub_marker};

use crate::dispatcher::HttpResponse;
use crate::error::ResolveError;
use crate::models::{ListEntry, Title, TitleId, User};
use async_trait::async_trait;

/// Source of a user's remote watch-list.
#[async_trait]
pub trait WatchListSource: Send + Sync {
    /// Fetches every entry of every list the user has, tagged with the
    /// list name. Filtering is left to the caller.
    async fn fetch_entries(&self, user: &User) -> Result<Vec<ListEntry>, ResolveError>;
}

/// Lookup of single titles in the catalog.
#[async_trait]
pub trait TitleCatalog: Send + Sync {
    async fn fetch_title(&self, title_id: TitleId) -> Result<Title, ResolveError>;
}

/// The schedule site: structured search and per-title HTML pages.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Searches schedule entries linked to the given catalog id.
    async fn search(&self, title_id: TitleId) -> Result<Vec<ScheduleCandidate>, ResolveError>;

    /// Fetches the HTML page of a schedule entry.
    async fn title_page(&self, slug: &str) -> Result<String, ResolveError>;
}

/// Turns a non-success response into an upstream error.
fn ensure_success(
    response: HttpResponse,
    upstream: &'static str,
) -> Result<HttpResponse, ResolveError> {
    if !response.is_success() {
        tracing::warn!(upstream, status = response.status, "upstream returned an error status");
        return Err(ResolveError::Upstream {
            upstream,
            status: response.status,
        });
    }
    Ok(response)
}

/// Joins a base URL and a path without doubling slashes.
fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://animeschedule.net/", "/anime/frieren"),
            "https://animeschedule.net/anime/frieren"
        );
        assert_eq!(
            join_url("https://animeschedule.net/api/v3", "anime"),
            "https://animeschedule.net/api/v3/anime"
        );
    }

    #[test]
    fn test_ensure_success() {
        assert!(ensure_success(HttpResponse::new(200, "{}"), "test").is_ok());
        match ensure_success(HttpResponse::new(503, ""), "test") {
            Err(ResolveError::Upstream { upstream, status }) => {
                assert_eq!(upstream, "test");
                assert_eq!(status, 503);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

//! GraphQL list site client (AniList).

use super::{TitleCatalog, WatchListSource, ensure_success};
use crate::config::AnilistConfig;
use crate::dispatcher::{Dispatcher, HttpRequest, HttpResponse};
use crate::error::ResolveError;
use crate::models::{ListEntry, ReleaseStatus, Title, TitleId, User};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

const MEDIA_FRAGMENT: &str = r#"
fragment media on Media {
  id
  title { english romaji }
  status(version: 2)
  episodes
  coverImage { extraLarge }
  relations {
    edges {
      relationType
      node { id }
    }
  }
}
"#;

const LIST_QUERY: &str = r#"
query ($userId: Int) {
  MediaListCollection(userId: $userId, type: ANIME) {
    lists {
      name
      entries {
        id
        mediaId
        media { ...media }
      }
    }
  }
}
"#;

const MEDIA_QUERY: &str = r#"
query ($id: Int) {
  Media(id: $id) { ...media }
}
"#;

/// Relation type marking a direct sequel.
const SEQUEL_RELATION: &str = "SEQUEL";

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListCollectionData {
    media_list_collection: Option<MediaListCollection>,
}

#[derive(Debug, Deserialize)]
struct MediaListCollection {
    #[serde(default)]
    lists: Vec<MediaList>,
}

#[derive(Debug, Deserialize)]
struct MediaList {
    #[serde(default)]
    name: String,
    #[serde(default)]
    entries: Vec<MediaListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaListEntry {
    media_id: TitleId,
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaData {
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Media {
    id: TitleId,
    title: MediaTitle,
    status: Option<String>,
    episodes: Option<u32>,
    cover_image: Option<CoverImage>,
    relations: Option<Relations>,
}

#[derive(Debug, Deserialize)]
struct MediaTitle {
    english: Option<String>,
    romaji: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoverImage {
    extra_large: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relations {
    #[serde(default)]
    edges: Vec<RelationEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationEdge {
    relation_type: Option<String>,
    node: Option<RelationNode>,
}

#[derive(Debug, Deserialize)]
struct RelationNode {
    id: TitleId,
}

impl Media {
    /// English title, falling back to romaji. Blank names count as missing.
    fn display_name(&self) -> Option<String> {
        [&self.title.english, &self.title.romaji]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .map(str::to_string)
    }

    fn into_title(self) -> Option<Title> {
        let name = self.display_name()?;
        let status = self
            .status
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(ReleaseStatus::Releasing);

        Some(Title {
            id: self.id,
            name,
            cover_image: self.cover_image.and_then(|c| c.extra_large),
            episodes: self.episodes.filter(|n| *n > 0),
            status,
        })
    }

    fn sequels(&self) -> Vec<TitleId> {
        self.relations
            .iter()
            .flat_map(|r| r.edges.iter())
            .filter(|edge| edge.relation_type.as_deref() == Some(SEQUEL_RELATION))
            .filter_map(|edge| edge.node.as_ref().map(|node| node.id))
            .collect()
    }
}

/// Client for the GraphQL list site.
pub struct AnilistClient {
    dispatcher: Arc<Dispatcher>,
    config: AnilistConfig,
}

impl AnilistClient {
    pub fn new(dispatcher: Arc<Dispatcher>, config: AnilistConfig) -> Self {
        Self { dispatcher, config }
    }

    async fn query(
        &self,
        query: &str,
        variables: serde_json::Value,
        token: Option<&str>,
    ) -> Result<HttpResponse, ResolveError> {
        let body = json!({
            "query": format!("{query}{MEDIA_FRAGMENT}"),
            "variables": variables,
        });
        let mut request = HttpRequest::post_json(&self.config.endpoint, body)?
            .header("Accept", "application/json");
        if let Some(token) = token {
            request = request.bearer(token);
        }

        Ok(self.dispatcher.send(request).await?)
    }
}

/// Parses a successful GraphQL body, returning its `data` member.
fn parse_data<T: DeserializeOwned>(response: &HttpResponse) -> Result<Option<T>, ResolveError> {
    let parsed = response
        .json::<GraphqlResponse<T>>()
        .map_err(|e| ResolveError::Parse(format!("GraphQL response: {e}")))?;

    if parsed.data.is_none() && !parsed.errors.is_empty() {
        let messages: Vec<&str> = parsed.errors.iter().map(|e| e.message.as_str()).collect();
        warn!(errors = %messages.join("; "), "GraphQL query returned errors");
        return Err(ResolveError::Parse(format!(
            "GraphQL errors: {}",
            messages.join("; ")
        )));
    }
    Ok(parsed.data)
}

#[async_trait]
impl WatchListSource for AnilistClient {
    async fn fetch_entries(&self, user: &User) -> Result<Vec<ListEntry>, ResolveError> {
        let response = self
            .query(
                LIST_QUERY,
                json!({ "userId": user.anilist_id }),
                user.access_token.as_deref(),
            )
            .await?;
        let response = ensure_success(response, "anilist")?;

        let collection = parse_data::<ListCollectionData>(&response)?
            .and_then(|d| d.media_list_collection)
            .ok_or_else(|| ResolveError::Parse("missing MediaListCollection".to_string()))?;

        let entries: Vec<ListEntry> = collection
            .lists
            .into_iter()
            .flat_map(|list| {
                let list_name = list.name;
                list.entries.into_iter().map(move |entry| {
                    let (title_id, title, sequels) = match entry.media {
                        Some(media) => {
                            let sequels = media.sequels();
                            (media.id, media.into_title(), sequels)
                        }
                        None => (entry.media_id, None, Vec::new()),
                    };
                    ListEntry {
                        title_id,
                        list_name: list_name.clone(),
                        title,
                        sequels,
                    }
                })
            })
            .collect();

        debug!(user_id = user.id, entries = entries.len(), "fetched watch-list");
        Ok(entries)
    }
}

#[async_trait]
impl TitleCatalog for AnilistClient {
    async fn fetch_title(&self, title_id: TitleId) -> Result<Title, ResolveError> {
        let response = self
            .query(MEDIA_QUERY, json!({ "id": title_id }), None)
            .await?;
        if response.status == 404 {
            return Err(ResolveError::NotFound(title_id));
        }
        let response = ensure_success(response, "anilist")?;

        let media = parse_data::<MediaData>(&response)?
            .and_then(|d| d.media)
            .ok_or(ResolveError::NotFound(title_id))?;

        media
            .into_title()
            .ok_or_else(|| ResolveError::Parse(format!("media {title_id} has no usable title")))
    }
}

//! Schedule site client (animeschedule.net).
//!
//! The structured API tells us whether a dub exists at all. Progress of an
//! airing dub is only published on the HTML page, so that part is scraped.
//! All markup knowledge lives in [`parse_dub_marker`].

use super::{ScheduleSource, ensure_success, join_url};
use crate::config::AnimeScheduleConfig;
use crate::dispatcher::{Dispatcher, HttpRequest};
use crate::error::ResolveError;
use crate::models::TitleId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// First run of digits in the marker label ("Episode 5").
static EPISODE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("Invalid EPISODE_NUMBER regex"));

/// CSS selectors used for parsing.
struct Selectors {
    /// Heading announcing the next dub episode.
    dub_heading: Selector,
    /// Air time of the next dub episode.
    dub_time: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            dub_heading: Selector::parse("h3.release-time-type-dub").unwrap(),
            dub_time: Selector::parse("time#release-time-dub").unwrap(),
        }
    }
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(Selectors::new);

/// The next dub episode announced on a title page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DubMarker {
    /// Ordinal of the announced (not yet aired) episode.
    pub episode: u32,
    pub air_time: DateTime<Utc>,
}

/// Extracts the "next dub episode" marker from a title page.
///
/// Returns `None` when the marker is missing, the episode ordinal can't be
/// read (or is zero), or the air time isn't a valid RFC 3339 timestamp.
pub fn parse_dub_marker(html: &str) -> Option<DubMarker> {
    let doc = Html::parse_document(html);
    let heading = doc.select(&SELECTORS.dub_heading).next()?;

    // The ordinal sits in the heading's first child element, e.g.
    // <h3 class="release-time-type-dub"><span>Episode 5</span> Dub</h3>
    let label: String = match heading.children().filter_map(ElementRef::wrap).next() {
        Some(first) => first.text().collect(),
        None => heading.text().collect(),
    };
    let episode = EPISODE_NUMBER
        .captures(&label)?
        .get(1)?
        .as_str()
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)?;

    let datetime = doc
        .select(&SELECTORS.dub_time)
        .next()
        .and_then(|time| time.value().attr("datetime"))
        .or_else(|| {
            // Older layout: the time element is the heading's next sibling
            // element inside the same wrapper.
            heading
                .parent()
                .and_then(ElementRef::wrap)
                .and_then(|wrapper| wrapper.children().filter_map(ElementRef::wrap).nth(1))
                .and_then(|elem| elem.value().attr("datetime"))
        })?;

    let air_time = DateTime::parse_from_rfc3339(datetime.trim())
        .ok()?
        .with_timezone(&Utc);

    Some(DubMarker { episode, air_time })
}

/// Search response of the structured API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    anime: Vec<ScheduleCandidate>,
}

/// One schedule entry returned by the search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCandidate {
    #[serde(default)]
    pub title: String,

    /// Slug of the entry's HTML page.
    pub route: String,

    /// Episode count, `None` or zero when unknown.
    #[serde(default)]
    pub episodes: Option<u32>,

    /// Airing status as the schedule site reports it ("Ongoing", "Finished").
    #[serde(default)]
    pub status: String,

    /// Original-language air time.
    #[serde(default)]
    pub jpn_time: Option<String>,

    /// Dub air time. Equal to `jpn_time` when no dub is scheduled.
    #[serde(default)]
    pub dub_time: Option<String>,
}

impl ScheduleCandidate {
    /// Known episode count.
    pub fn episode_count(&self) -> Option<u32> {
        self.episodes.filter(|n| *n > 0)
    }

    /// A dub exists only if its timestamp differs from the original one.
    pub fn has_dub(&self) -> bool {
        let dub = match self.dub_time.as_deref().map(str::trim) {
            Some(dub) if !dub.is_empty() => dub,
            _ => return false,
        };
        let jpn = match self.jpn_time.as_deref().map(str::trim) {
            Some(jpn) if !jpn.is_empty() => jpn,
            _ => return true,
        };

        match (
            DateTime::parse_from_rfc3339(jpn),
            DateTime::parse_from_rfc3339(dub),
        ) {
            (Ok(jpn), Ok(dub)) => jpn != dub,
            _ => jpn != dub,
        }
    }
}

/// Client for the schedule site.
pub struct AnimeScheduleClient {
    dispatcher: Arc<Dispatcher>,
    config: AnimeScheduleConfig,
}

impl AnimeScheduleClient {
    pub fn new(dispatcher: Arc<Dispatcher>, config: AnimeScheduleConfig) -> Self {
        Self { dispatcher, config }
    }
}

#[async_trait]
impl ScheduleSource for AnimeScheduleClient {
    async fn search(&self, title_id: TitleId) -> Result<Vec<ScheduleCandidate>, ResolveError> {
        let request = HttpRequest::get(&join_url(&self.config.api_url, "anime"))?
            .query("anilist-ids", &title_id.to_string())
            .bearer(&self.config.token);

        let response = self.dispatcher.send(request).await?;
        let response = ensure_success(response, "animeschedule api")?;
        let parsed: SearchResponse = response
            .json()
            .map_err(|e| ResolveError::Parse(format!("schedule search for {title_id}: {e}")))?;

        debug!(title_id, candidates = parsed.anime.len(), "schedule search finished");
        Ok(parsed.anime)
    }

    async fn title_page(&self, slug: &str) -> Result<String, ResolveError> {
        let url = join_url(&self.config.site_url, &format!("anime/{slug}"));
        let response = self.dispatcher.send(HttpRequest::get(&url)?).await?;
        let response = ensure_success(response, "animeschedule site")?;
        Ok(response.body)
    }
}

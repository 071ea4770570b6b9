//! Scripted fakes and fixtures shared by the unit tests.

use crate::dispatcher::{Clock, HttpRequest, HttpResponse, Transport, origin_key};
use crate::error::{DispatchError, NotifyError, ResolveError};
use crate::models::{ListEntry, ReleaseStatus, Title, TitleId, User, UserId};
use crate::notifier::NotificationTransport;
use crate::upstream::{ScheduleCandidate, ScheduleSource, TitleCatalog, WatchListSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[derive(Default)]
struct InFlight {
    current: usize,
    max: usize,
}

/// Transport replaying canned responses per URL.
///
/// Responses queued for a URL are handed out in order; the last one repeats.
/// Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Option<Duration>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    total: Mutex<InFlight>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(normalize(url))
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.total.lock().unwrap().max
    }

    pub fn max_in_flight_for(&self, origin: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .get(origin)
            .map_or(0, |f| f.max)
    }

    fn enter(&self, origin: &str) {
        let mut map = self.in_flight.lock().unwrap();
        let slot = map.entry(origin.to_string()).or_default();
        slot.current += 1;
        slot.max = slot.max.max(slot.current);

        let mut total = self.total.lock().unwrap();
        total.current += 1;
        total.max = total.max.max(total.current);
    }

    fn leave(&self, origin: &str) {
        if let Some(slot) = self.in_flight.lock().unwrap().get_mut(origin) {
            slot.current -= 1;
        }
        self.total.lock().unwrap().current -= 1;
    }

    fn next_response(&self, url: &Url) -> HttpResponse {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(url.as_str()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => HttpResponse::new(404, "not found"),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError> {
        self.requests.lock().unwrap().push(request.clone());
        let origin = origin_key(&request.url)?;

        self.enter(&origin);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let response = self.next_response(&request.url);
        self.leave(&origin);

        Ok(response)
    }
}

/// Clock that records sleeps and advances instantly.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if let Ok(step) = chrono::Duration::from_std(duration) {
            self.advance(step);
        }
        tokio::task::yield_now().await;
    }
}

/// Schedule site with scripted search results and pages.
#[derive(Default)]
pub struct FakeSchedule {
    searches: Mutex<HashMap<TitleId, Result<Vec<ScheduleCandidate>, u16>>>,
    pages: Mutex<HashMap<String, Result<String, u16>>>,
    hanging: Mutex<HashSet<TitleId>>,
    latency: Mutex<Option<Duration>>,
    search_calls: AtomicUsize,
    page_fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_candidates(&self, title_id: TitleId, candidates: Vec<ScheduleCandidate>) {
        self.searches
            .lock()
            .unwrap()
            .insert(title_id, Ok(candidates));
    }

    pub fn fail_search(&self, title_id: TitleId, status: u16) {
        self.searches.lock().unwrap().insert(title_id, Err(status));
    }

    /// Searches for this title never return.
    pub fn hang(&self, title_id: TitleId) {
        self.hanging.lock().unwrap().insert(title_id);
    }

    pub fn set_page(&self, slug: &str, html: impl Into<String>) {
        self.pages
            .lock()
            .unwrap()
            .insert(slug.to_string(), Ok(html.into()));
    }

    pub fn fail_page(&self, slug: &str, status: u16) {
        self.pages
            .lock()
            .unwrap()
            .insert(slug.to_string(), Err(status));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_searches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleSource for FakeSchedule {
    async fn search(&self, title_id: TitleId) -> Result<Vec<ScheduleCandidate>, ResolveError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let hangs = self.hanging.lock().unwrap().contains(&title_id);
        if hangs {
            std::future::pending::<()>().await;
        }
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.searches.lock().unwrap().get(&title_id) {
            Some(Ok(candidates)) => Ok(candidates.clone()),
            Some(Err(status)) => Err(ResolveError::Upstream {
                upstream: "animeschedule api",
                status: *status,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn title_page(&self, slug: &str) -> Result<String, ResolveError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        match self.pages.lock().unwrap().get(slug) {
            Some(Ok(html)) => Ok(html.clone()),
            Some(Err(status)) => Err(ResolveError::Upstream {
                upstream: "animeschedule site",
                status: *status,
            }),
            None => Err(ResolveError::Upstream {
                upstream: "animeschedule site",
                status: 404,
            }),
        }
    }
}

/// Watch-lists keyed by local user id.
#[derive(Default)]
pub struct FakeWatchList {
    entries: Mutex<HashMap<UserId, Vec<ListEntry>>>,
    failing: Mutex<HashSet<UserId>>,
}

impl FakeWatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_entries(&self, user_id: UserId, entries: Vec<ListEntry>) {
        self.entries.lock().unwrap().insert(user_id, entries);
        self.failing.lock().unwrap().remove(&user_id);
    }

    pub fn fail_for(&self, user_id: UserId) {
        self.failing.lock().unwrap().insert(user_id);
    }
}

#[async_trait]
impl WatchListSource for FakeWatchList {
    async fn fetch_entries(&self, user: &User) -> Result<Vec<ListEntry>, ResolveError> {
        if self.failing.lock().unwrap().contains(&user.id) {
            return Err(ResolveError::Upstream {
                upstream: "anilist",
                status: 500,
            });
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&user.id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Catalog holding a fixed set of titles.
#[derive(Default)]
pub struct FakeCatalog {
    titles: Mutex<HashMap<TitleId, Title>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, title: Title) {
        self.titles.lock().unwrap().insert(title.id, title);
    }
}

#[async_trait]
impl TitleCatalog for FakeCatalog {
    async fn fetch_title(&self, title_id: TitleId) -> Result<Title, ResolveError> {
        self.titles
            .lock()
            .unwrap()
            .get(&title_id)
            .cloned()
            .ok_or(ResolveError::NotFound(title_id))
    }
}

/// Notification transport that keeps every delivered message.
#[derive(Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<(UserId, String)>>,
    failing: Mutex<HashSet<UserId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, user_id: UserId) {
        self.failing.lock().unwrap().insert(user_id);
    }

    pub fn delivered(&self) -> Vec<(UserId, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn deliver(&self, user_id: UserId, message: &str) -> Result<(), NotifyError> {
        if self.failing.lock().unwrap().contains(&user_id) {
            return Err(NotifyError::Delivery(format!("user {user_id} unreachable")));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((user_id, message.to_string()));
        Ok(())
    }
}

pub fn title(id: TitleId, episodes: Option<u32>, status: ReleaseStatus) -> Title {
    Title {
        id,
        name: format!("Title {id}"),
        cover_image: Some(format!("https://img.example/{id}.jpg")),
        episodes,
        status,
    }
}

/// Schedule entry without a dub: both timestamps are equal.
pub fn candidate(route: &str, episodes: Option<u32>, jpn_time: &str) -> ScheduleCandidate {
    ScheduleCandidate {
        title: route.to_string(),
        route: route.to_string(),
        episodes,
        status: "Ongoing".to_string(),
        jpn_time: Some(jpn_time.to_string()),
        dub_time: Some(jpn_time.to_string()),
    }
}

/// Schedule entry with a dub scheduled after the original airing.
pub fn dubbed_candidate(route: &str, episodes: Option<u32>) -> ScheduleCandidate {
    ScheduleCandidate {
        dub_time: Some("2026-10-08T18:00:00Z".to_string()),
        ..candidate(route, episodes, "2026-10-01T15:00:00Z")
    }
}

/// Title page announcing the next dub episode.
pub fn dub_page(episode: u32, datetime: &str) -> String {
    format!(
        r#"<html><body>
        <section id="release-times-section">
          <div class="release-time-wrapper">
            <h3 class="release-time-type-dub"><span>Episode {episode}</span> Dub</h3>
            <time id="release-time-dub" datetime="{datetime}">soon</time>
          </div>
        </section>
        </body></html>"#
    )
}

/// Watch-list entry with catalog data for a releasing title.
pub fn entry(title_id: TitleId, list_name: &str) -> ListEntry {
    ListEntry {
        title_id,
        list_name: list_name.to_string(),
        title: Some(title(title_id, Some(12), ReleaseStatus::Releasing)),
        sequels: Vec::new(),
    }
}

pub fn user(id: UserId) -> User {
    User {
        id,
        anilist_id: 1000 + id,
        access_token: None,
        contact: None,
    }
}

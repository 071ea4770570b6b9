//! Engine facade.
//!
//! [`DubTracker`] wires the resolver, cache, reconciler and sweeper to one
//! set of collaborators and exposes the operations the CLI needs.

use crate::cache::DubCache;
use crate::config::Config;
use crate::dispatcher::{Clock, Dispatcher, ReqwestTransport, SystemClock};
use crate::error::{DispatchError, ResolveError, StoreError, SyncError};
use crate::models::{DubRecord, NotificationEvent, TitleId, User, UserId};
use crate::notifier::{
    DeliveryReport, LogTransport, NotificationTransport, Sweeper, WebhookTransport, deliver_all,
};
use crate::reconciler::{Reconciler, SyncReport};
use crate::resolver::Resolver;
use crate::store::Store;
use crate::upstream::{
    AnilistClient, AnimeScheduleClient, ScheduleSource, TitleCatalog, WatchListSource,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache lifetime advertised for records that never change again.
const PERMANENT_MAX_AGE_DAYS: i64 = 365;

/// External collaborators of the engine.
pub struct TrackerDeps {
    pub store: Arc<dyn Store>,
    pub schedule: Arc<dyn ScheduleSource>,
    pub watch_list: Arc<dyn WatchListSource>,
    pub catalog: Arc<dyn TitleCatalog>,
    pub transport: Arc<dyn NotificationTransport>,
    pub clock: Arc<dyn Clock>,
}

impl TrackerDeps {
    /// Network-backed collaborators sharing one dispatcher.
    pub fn live(config: &Config, store: Arc<dyn Store>) -> Result<Self, DispatchError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ReqwestTransport::new(&config.dispatcher)?),
            clock.clone(),
            config.dispatcher.clone(),
        ));

        let anilist = Arc::new(AnilistClient::new(
            dispatcher.clone(),
            config.anilist.clone(),
        ));
        let schedule = Arc::new(AnimeScheduleClient::new(
            dispatcher.clone(),
            config.animeschedule.clone(),
        ));
        let transport: Arc<dyn NotificationTransport> = match &config.notify.webhook_url {
            Some(url) => Arc::new(WebhookTransport::new(dispatcher, url.clone())),
            None => Arc::new(LogTransport),
        };

        Ok(Self {
            store,
            schedule,
            watch_list: anilist.clone(),
            catalog: anilist,
            transport,
            clock,
        })
    }
}

/// Summary label of a dub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusLabel {
    #[serde(rename = "releasing")]
    Releasing,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "no dub")]
    NoDub,
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatusLabel::Releasing => "releasing",
            StatusLabel::Finished => "finished",
            StatusLabel::NoDub => "no dub",
        };
        f.write_str(label)
    }
}

/// Public view of a title's dub status plus caching hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DubStatus {
    pub title_id: TitleId,
    pub name: String,
    pub has_dub: bool,
    pub is_releasing: bool,
    pub dubbed_episodes: u32,
    pub total_episodes: u32,
    pub next_air: Option<DateTime<Utc>>,
    pub label: StatusLabel,
    /// When clients should ask again.
    pub refresh_at: DateTime<Utc>,
    pub max_age_secs: i64,
}

/// Counts of one daily tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub synced_users: usize,
    pub failed_users: usize,
    pub events: usize,
    pub delivery: DeliveryReport,
}

/// The dub tracking engine.
pub struct DubTracker {
    cache: Arc<DubCache>,
    resolver: Arc<Resolver>,
    reconciler: Reconciler,
    sweeper: Sweeper,
    catalog: Arc<dyn TitleCatalog>,
    transport: Arc<dyn NotificationTransport>,
    clock: Arc<dyn Clock>,
}

impl DubTracker {
    pub fn new(config: &Config, deps: TrackerDeps) -> Self {
        let cache = Arc::new(DubCache::new(deps.store.clone(), &config.cache));
        let resolver = Arc::new(Resolver::new(
            deps.schedule,
            cache.clone(),
            deps.clock.clone(),
        ));
        let reconciler = Reconciler::new(
            deps.store.clone(),
            cache.clone(),
            resolver.clone(),
            deps.watch_list,
            config.sync.clone(),
        );
        let sweeper = Sweeper::new(
            deps.store,
            resolver.clone(),
            Some(deps.catalog.clone()),
            config.sweep.clone(),
        );

        Self {
            cache,
            resolver,
            reconciler,
            sweeper,
            catalog: deps.catalog,
            transport: deps.transport,
            clock: deps.clock,
        }
    }

    /// Resolves a title by id.
    ///
    /// Catalog data is preferred; if the catalog is unreachable the stored
    /// snapshot of a known title stands in.
    pub async fn resolve(&self, title_id: TitleId) -> Result<DubRecord, ResolveError> {
        let title = match self.catalog.fetch_title(title_id).await {
            Ok(title) => title,
            Err(e) => match self.cache.get(title_id).await? {
                Some(record) => {
                    debug!(title_id, error = %e, "catalog lookup failed, using stored snapshot");
                    record.to_title()
                }
                None => return Err(e),
            },
        };
        self.resolver.resolve(&title).await
    }

    /// Current status of a title, resolving it when unknown or stale.
    ///
    /// A stale record whose re-resolution fails is still returned.
    pub async fn status(&self, title_id: TitleId) -> Result<DubStatus, ResolveError> {
        let now = self.clock.now();
        let record = match self.cache.get(title_id).await? {
            Some(record) if self.cache.is_fresh(&record, now) => record,
            Some(stale) => match self.resolve(title_id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(title_id, error = %e, "refresh failed, serving stale record");
                    stale
                }
            },
            None => self.resolve(title_id).await?,
        };

        Ok(self.status_view(&record, self.clock.now()))
    }

    fn status_view(&self, record: &DubRecord, now: DateTime<Utc>) -> DubStatus {
        let state = &record.state;
        let label = match (state.has_dub, state.is_releasing) {
            (true, true) => StatusLabel::Releasing,
            (true, false) => StatusLabel::Finished,
            (false, _) => StatusLabel::NoDub,
        };
        let refresh_at = self
            .cache
            .refresh_at(record)
            .unwrap_or_else(|| now + Duration::days(PERMANENT_MAX_AGE_DAYS));

        DubStatus {
            title_id: record.title_id,
            name: record.name.clone(),
            has_dub: state.has_dub,
            is_releasing: state.is_releasing,
            dubbed_episodes: state.dubbed_episodes,
            total_episodes: state.total_episodes,
            next_air: state.next_air,
            label,
            refresh_at,
            max_age_secs: (refresh_at - now).num_seconds().max(0),
        }
    }

    pub async fn sync_user(&self, user_id: UserId) -> Result<SyncReport, SyncError> {
        self.reconciler.sync_user(user_id).await
    }

    pub async fn sync_all(
        &self,
    ) -> Result<Vec<(UserId, Result<SyncReport, SyncError>)>, StoreError> {
        self.reconciler.sync_all().await
    }

    pub async fn run_daily_sweep(&self) -> Result<Vec<NotificationEvent>, StoreError> {
        self.sweeper.run_daily_sweep().await
    }

    pub async fn deliver(&self, events: &[NotificationEvent]) -> DeliveryReport {
        deliver_all(self.transport.as_ref(), events).await
    }

    /// Syncs every user, sweeps, and delivers the resulting notifications.
    pub async fn daily_tick(&self) -> Result<TickReport, StoreError> {
        let outcomes = self.sync_all().await?;
        let failed_users = outcomes.iter().filter(|(_, o)| o.is_err()).count();

        let events = self.run_daily_sweep().await?;
        let delivery = self.deliver(&events).await;

        let report = TickReport {
            synced_users: outcomes.len() - failed_users,
            failed_users,
            events: events.len(),
            delivery,
        };
        info!(
            synced = report.synced_users,
            failed = report.failed_users,
            events = report.events,
            delivered = report.delivery.delivered,
            "daily tick finished"
        );
        Ok(report)
    }

    pub async fn add_user(&self, user: User) -> Result<(), StoreError> {
        info!(user_id = user.id, anilist_id = user.anilist_id, "registering user");
        self.cache.store().upsert_user(user).await
    }
}

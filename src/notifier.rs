//! Daily sweep and notification delivery.
//!
//! The sweep re-resolves every releasing dub, plus every title still without
//! a dub so late announcements are picked up. A dub that was releasing
//! before and no longer is afterwards produces one event per subscriber,
//! whether it completed or dropped off the schedule.

use crate::config::SweepConfig;
use crate::dispatcher::{Dispatcher, HttpRequest};
use crate::error::{NotifyError, ResolveError, StoreError};
use crate::models::{DubRecord, NotificationEvent, Title, UserId};
use crate::resolver::Resolver;
use crate::store::{DubFilter, Store};
use crate::upstream::TitleCatalog;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where notification messages go.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, user_id: UserId, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn deliver(&self, user_id: UserId, message: &str) -> Result<(), NotifyError> {
        info!(user_id, message, "notification");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    user_id: UserId,
    content: &'a str,
}

/// Posts each notification as JSON to a webhook.
pub struct WebhookTransport {
    dispatcher: Arc<Dispatcher>,
    url: String,
}

impl WebhookTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, url: impl Into<String>) -> Self {
        Self {
            dispatcher,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn deliver(&self, user_id: UserId, message: &str) -> Result<(), NotifyError> {
        let body = serde_json::to_value(WebhookPayload {
            user_id,
            content: message,
        })
        .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let response = self
            .dispatcher
            .send(HttpRequest::post_json(&self.url, body)?)
            .await?;
        if !response.is_success() {
            return Err(NotifyError::Delivery(format!(
                "webhook returned HTTP {}",
                response.status
            )));
        }
        Ok(())
    }
}

/// Counts of one delivery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers every event. A failure for one user doesn't stop the rest.
pub async fn deliver_all(
    transport: &dyn NotificationTransport,
    events: &[NotificationEvent],
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for event in events {
        match transport.deliver(event.user_id, &event.message()).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(user_id = event.user_id, title_id = event.title.id, error = %e, "notification delivery failed");
                report.failed += 1;
            }
        }
    }
    report
}

/// Re-checks tracked titles and reports finished dubs.
pub struct Sweeper {
    store: Arc<dyn Store>,
    resolver: Arc<Resolver>,
    catalog: Option<Arc<dyn TitleCatalog>>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: Arc<Resolver>,
        catalog: Option<Arc<dyn TitleCatalog>>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            catalog,
            config,
        }
    }

    /// Runs one sweep and returns the notification events it produced.
    ///
    /// Titles are processed with bounded concurrency, each under its own
    /// timeout. A title that fails or hangs is skipped until the next sweep.
    pub async fn run_daily_sweep(&self) -> Result<Vec<NotificationEvent>, StoreError> {
        let releasing = self.store.dubs_where(DubFilter::Releasing).await?;
        let idle = self.store.dubs_where(DubFilter::NoDubIdle).await?;
        info!(releasing = releasing.len(), no_dub = idle.len(), "starting sweep");

        let events: Vec<NotificationEvent> = futures::stream::iter(releasing.into_iter().chain(idle))
            .map(|before| self.recheck(before))
            .buffer_unordered(self.config.concurrency.max(1))
            .flat_map(futures::stream::iter)
            .collect()
            .await;

        info!(events = events.len(), "sweep finished");
        Ok(events)
    }

    async fn recheck(&self, before: DubRecord) -> Vec<NotificationEvent> {
        let title_id = before.title_id;
        let outcome = tokio::time::timeout(self.config.title_timeout(), async {
            let title = self.current_title(&before).await;
            let after = self.resolver.resolve(&title).await?;
            Ok::<_, ResolveError>((title, after))
        })
        .await;

        let (title, after) = match outcome {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                debug!(title_id, error = %e, "sweep skipped title");
                return Vec::new();
            }
            Err(_) => {
                let e = ResolveError::Timeout(title_id);
                warn!(title_id, timeout_secs = self.config.title_timeout_secs, error = %e, "sweep skipped title");
                return Vec::new();
            }
        };

        if !(before.state.is_releasing && !after.state.is_releasing) {
            return Vec::new();
        }

        let subscribers = match self.store.subscriptions_for_title(title_id).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                warn!(title_id, error = %e, "failed to load subscribers");
                return Vec::new();
            }
        };
        info!(
            title_id,
            subscribers = subscribers.len(),
            has_dub = after.state.has_dub,
            "dub stopped releasing"
        );

        subscribers
            .into_iter()
            .map(|subscription| NotificationEvent {
                user_id: subscription.user_id,
                title: title.clone(),
                record: after.clone(),
            })
            .collect()
    }

    /// Fresh catalog data for the record's title, or the stored snapshot.
    async fn current_title(&self, record: &DubRecord) -> Title {
        if let Some(catalog) = &self.catalog {
            match catalog.fetch_title(record.title_id).await {
                Ok(title) => return title,
                Err(e) => {
                    debug!(title_id = record.title_id, error = %e, "catalog lookup failed, using stored snapshot");
                }
            }
        }
        record.to_title()
    }
}

/// Next occurrence of `hour`:00 UTC strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
    if today > now {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DubCache;
    use crate::config::{CacheConfig, DispatcherConfig};
    use crate::dispatcher::HttpResponse;
    use crate::models::{ReleaseStatus, Subscription, TitleId};
    use crate::store::MemoryStore;
    use crate::testing::{
        self, FakeCatalog, FakeSchedule, FakeTransport, ManualClock, RecordingTransport,
    };

    struct Harness {
        store: Arc<MemoryStore>,
        schedule: Arc<FakeSchedule>,
        catalog: Arc<FakeCatalog>,
        resolver: Arc<Resolver>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let schedule = Arc::new(FakeSchedule::new());
            let cache = Arc::new(DubCache::new(store.clone(), &CacheConfig::default()));
            let resolver = Arc::new(Resolver::new(
                schedule.clone(),
                cache,
                Arc::new(ManualClock::new(Utc::now())),
            ));
            Self {
                store,
                schedule,
                catalog: Arc::new(FakeCatalog::new()),
                resolver,
            }
        }

        fn sweeper(&self, config: SweepConfig) -> Sweeper {
            Sweeper::new(
                self.store.clone(),
                self.resolver.clone(),
                Some(self.catalog.clone()),
                config,
            )
        }

        /// Resolves `title_id` into a releasing dub.
        async fn releasing(&self, title_id: TitleId) -> DubRecord {
            let slug = format!("title-{title_id}");
            self.schedule
                .set_candidates(title_id, vec![testing::dubbed_candidate(&slug, Some(12))]);
            self.schedule
                .set_page(&slug, testing::dub_page(6, "2026-10-20T15:30:00Z"));
            self.resolver
                .resolve(&testing::title(title_id, Some(12), ReleaseStatus::Releasing))
                .await
                .unwrap()
        }

        async fn subscribe(&self, user_id: UserId, record: &DubRecord) {
            self.store
                .ensure_subscription(Subscription {
                    user_id,
                    title_id: record.title_id,
                    dub_id: record.id,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_finished_dub_notifies_each_subscriber_once() {
        let h = Harness::new();
        let finishing = h.releasing(1).await;
        let other = h.releasing(2).await;
        h.subscribe(10, &finishing).await;
        h.subscribe(11, &finishing).await;
        h.subscribe(12, &other).await;

        h.schedule.set_page("title-1", "<html><body></body></html>");
        let events = h
            .sweeper(SweepConfig::default())
            .run_daily_sweep()
            .await
            .unwrap();

        let mut users: Vec<UserId> = events.iter().map(|e| e.user_id).collect();
        users.sort_unstable();
        assert_eq!(users, vec![10, 11]);
        assert!(events.iter().all(|e| e.record.state.is_complete()));
        assert!(events.iter().all(|e| e.title.id == 1));
    }

    #[tokio::test]
    async fn test_dub_dropped_from_schedule_notifies() {
        let h = Harness::new();
        let record = h.releasing(1).await;
        h.subscribe(10, &record).await;

        h.schedule.set_candidates(
            1,
            vec![testing::candidate("title-1", Some(12), "2026-10-01T15:00:00Z")],
        );
        let events = h
            .sweeper(SweepConfig::default())
            .run_daily_sweep()
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, 10);
        assert!(!events[0].record.state.has_dub);
        assert!(!events[0].record.state.is_releasing);
    }

    #[tokio::test]
    async fn test_still_releasing_is_silent() {
        let h = Harness::new();
        let record = h.releasing(1).await;
        h.subscribe(10, &record).await;

        let events = h
            .sweeper(SweepConfig::default())
            .run_daily_sweep()
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_status_finishes_dub() {
        let h = Harness::new();
        let record = h.releasing(1).await;
        h.subscribe(10, &record).await;
        h.catalog
            .insert(testing::title(1, Some(12), ReleaseStatus::Finished));

        let events = h
            .sweeper(SweepConfig::default())
            .run_daily_sweep()
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title.status, ReleaseStatus::Finished);
        assert_eq!(events[0].record.state.dubbed_episodes, 12);
    }

    #[tokio::test]
    async fn test_no_dub_titles_are_rechecked() {
        let h = Harness::new();
        h.schedule.set_candidates(
            5,
            vec![testing::candidate("quiet", Some(12), "2026-10-01T15:00:00Z")],
        );
        h.resolver
            .resolve(&testing::title(5, Some(12), ReleaseStatus::Finished))
            .await
            .unwrap();

        // a dub gets announced later
        h.schedule
            .set_candidates(5, vec![testing::dubbed_candidate("quiet", Some(12))]);
        let events = h
            .sweeper(SweepConfig::default())
            .run_daily_sweep()
            .await
            .unwrap();

        assert!(events.is_empty());
        assert_eq!(h.schedule.search_calls(), 2);
        assert!(h.store.dub(5).await.unwrap().unwrap().state.has_dub);
    }

    #[tokio::test]
    async fn test_hanging_title_does_not_block_others() {
        let h = Harness::new();
        let stuck = h.releasing(1).await;
        let finishing = h.releasing(2).await;
        h.subscribe(10, &stuck).await;
        h.subscribe(10, &finishing).await;

        h.schedule.hang(1);
        h.schedule.set_page("title-2", "<html></html>");
        let config = SweepConfig {
            title_timeout_secs: 1,
            ..Default::default()
        };
        let events = h.sweeper(config).run_daily_sweep().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title.id, 2);
        assert!(h.store.dub(1).await.unwrap().unwrap().state.is_releasing);
    }

    #[tokio::test]
    async fn test_delivery_continues_after_failure() {
        let transport = RecordingTransport::new();
        transport.fail_for(1);
        let record = DubRecord {
            id: 1,
            title_id: 7,
            name: "Title 7".to_string(),
            schedule_slug: "title-7".to_string(),
            cover_image: None,
            release_status: ReleaseStatus::Finished,
            state: crate::models::DubState::complete(12),
            last_resolved_at: Utc::now(),
        };
        let events: Vec<NotificationEvent> = [1, 2]
            .into_iter()
            .map(|user_id| NotificationEvent {
                user_id,
                title: record.to_title(),
                record: record.clone(),
            })
            .collect();

        let report = deliver_all(&transport, &events).await;

        assert_eq!(report, DeliveryReport { delivered: 1, failed: 1 });
        let delivered = transport.delivered();
        assert_eq!(delivered[0].0, 2);
        assert!(delivered[0].1.contains("**Title 7**"));
        assert!(delivered[0].1.contains("12 episodes"));
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond("https://hooks.example/dub", HttpResponse::new(204, ""));
        let dispatcher = Arc::new(Dispatcher::new(
            fake.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            DispatcherConfig::default(),
        ));
        let webhook = WebhookTransport::new(dispatcher, "https://hooks.example/dub");

        webhook.deliver(42, "done").await.unwrap();

        let requests = fake.requests();
        assert_eq!(
            requests[0].body,
            Some(serde_json::json!({ "user_id": 42, "content": "done" }))
        );
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond("https://hooks.example/dub", HttpResponse::new(500, ""));
        let dispatcher = Arc::new(Dispatcher::new(
            fake,
            Arc::new(ManualClock::new(Utc::now())),
            DispatcherConfig::default(),
        ));
        let webhook = WebhookTransport::new(dispatcher, "https://hooks.example/dub");

        assert!(matches!(
            webhook.deliver(42, "done").await,
            Err(NotifyError::Delivery(_))
        ));
    }

    #[test]
    fn test_next_run_after() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(
            next_run_after(now, 18),
            Utc.with_ymd_and_hms(2026, 10, 16, 18, 0, 0).unwrap()
        );
        assert_eq!(
            next_run_after(now, 0),
            Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap()
        );
        assert_eq!(
            next_run_after(now, 12),
            Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
        );
    }
}

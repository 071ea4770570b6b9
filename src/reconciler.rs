//! Watch-list reconciliation.
//!
//! A sync makes a user's subscriptions match their remote watch-list: titles
//! that appeared get a subscription (resolving the title first if it has no
//! record yet), titles that disappeared lose theirs. The add, remove and
//! sequel passes run independently, so a failure in one never skips the
//! others.

use crate::cache::DubCache;
use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError};
use crate::models::{DubRecord, ListEntry, SequelLink, Subscription, TitleId, UserId};
use crate::resolver::Resolver;
use crate::store::Store;
use crate::upstream::WatchListSource;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one user sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub user_id: UserId,
    /// Titles in the filtered remote list.
    pub remote: usize,
    /// Subscriptions created.
    pub added: usize,
    /// Titles resolved for the first time.
    pub resolved: usize,
    /// Entries skipped because they had no usable title or failed to resolve.
    pub skipped: usize,
    /// Stale subscriptions deleted.
    pub removed: usize,
    /// New sequel links.
    pub sequels: usize,
}

/// Reconciles users' watch-lists with their local subscriptions.
pub struct Reconciler {
    store: Arc<dyn Store>,
    cache: Arc<DubCache>,
    resolver: Arc<Resolver>,
    watch_list: Arc<dyn WatchListSource>,
    config: SyncConfig,
    /// Keeps syncs sequential.
    sync_lock: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<DubCache>,
        resolver: Arc<Resolver>,
        watch_list: Arc<dyn WatchListSource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            cache,
            resolver,
            watch_list,
            config,
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Synchronizes one user.
    ///
    /// If the watch-list can't be fetched nothing is changed. Otherwise all
    /// three passes run and the first store error, if any, is returned
    /// afterwards.
    pub async fn sync_user(&self, user_id: UserId) -> Result<SyncReport, SyncError> {
        let _guard = self.sync_lock.lock().await;

        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or(SyncError::UnknownUser(user_id))?;
        let entries = self
            .watch_list
            .fetch_entries(&user)
            .await
            .map_err(|source| SyncError::WatchList { user_id, source })?;

        let mut report = SyncReport {
            user_id,
            ..Default::default()
        };
        let remote = self.filter_entries(user_id, entries, &mut report);
        report.remote = remote.len();

        let mut first_error: Option<StoreError> = None;
        if let Err(e) = self.add_pass(user_id, &remote, &mut report).await {
            warn!(user_id, error = %e, "add pass failed");
            first_error.get_or_insert(e);
        }
        match self.remove_pass(user_id, &remote).await {
            Ok(removed) => report.removed = removed,
            Err(e) => {
                warn!(user_id, error = %e, "remove pass failed");
                first_error.get_or_insert(e);
            }
        }
        match self.sequel_pass(&remote).await {
            Ok(sequels) => report.sequels = sequels,
            Err(e) => {
                warn!(user_id, error = %e, "sequel pass failed");
                first_error.get_or_insert(e);
            }
        }

        info!(
            user_id,
            remote = report.remote,
            added = report.added,
            resolved = report.resolved,
            skipped = report.skipped,
            removed = report.removed,
            "user sync finished"
        );

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Synchronizes every stored user, one after another. Per-user failures
    /// are reported, never propagated.
    pub async fn sync_all(
        &self,
    ) -> Result<Vec<(UserId, Result<SyncReport, SyncError>)>, StoreError> {
        let users = self.store.users().await?;
        let mut outcomes = Vec::with_capacity(users.len());

        for user in users {
            let outcome = self.sync_user(user.id).await;
            if let Err(e) = &outcome {
                warn!(user_id = user.id, error = %e, "user sync failed");
            }
            outcomes.push((user.id, outcome));
        }

        Ok(outcomes)
    }

    /// Drops excluded lists and untitled entries, deduplicating by title.
    fn filter_entries(
        &self,
        user_id: UserId,
        entries: Vec<ListEntry>,
        report: &mut SyncReport,
    ) -> BTreeMap<TitleId, ListEntry> {
        let mut remote = BTreeMap::new();

        for entry in entries {
            if self
                .config
                .excluded_lists
                .iter()
                .any(|list| list.eq_ignore_ascii_case(&entry.list_name))
            {
                continue;
            }
            if entry.title.is_none() {
                warn!(user_id, title_id = entry.title_id, "entry has no usable title, skipping");
                report.skipped += 1;
                continue;
            }
            remote.entry(entry.title_id).or_insert(entry);
        }

        remote
    }

    async fn add_pass(
        &self,
        user_id: UserId,
        remote: &BTreeMap<TitleId, ListEntry>,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let ids: Vec<TitleId> = remote.keys().copied().collect();
        let cached: HashMap<TitleId, DubRecord> = self
            .cache
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .map(|record| (record.title_id, record))
            .collect();
        debug!(user_id, cached = cached.len(), uncached = ids.len() - cached.len(), "partitioned entries");

        for (title_id, entry) in remote {
            let record = match cached.get(title_id) {
                Some(record) => record.clone(),
                None => {
                    let Some(title) = &entry.title else {
                        continue;
                    };
                    match self.resolver.resolve(title).await {
                        Ok(record) => {
                            report.resolved += 1;
                            record
                        }
                        Err(e) => {
                            // Left for the next sync.
                            debug!(user_id, title_id, error = %e, "skipping unresolved title");
                            report.skipped += 1;
                            continue;
                        }
                    }
                }
            };

            let created = self
                .store
                .ensure_subscription(Subscription {
                    user_id,
                    title_id: *title_id,
                    dub_id: record.id,
                })
                .await?;
            if created {
                report.added += 1;
            }
        }

        Ok(())
    }

    async fn remove_pass(
        &self,
        user_id: UserId,
        remote: &BTreeMap<TitleId, ListEntry>,
    ) -> Result<usize, StoreError> {
        let stale: Vec<TitleId> = self
            .store
            .subscriptions_for_user(user_id)
            .await?
            .into_iter()
            .map(|s| s.title_id)
            .filter(|title_id| !remote.contains_key(title_id))
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }
        debug!(user_id, ?stale, "removing stale subscriptions");
        self.store.delete_subscriptions(user_id, &stale).await
    }

    async fn sequel_pass(&self, remote: &BTreeMap<TitleId, ListEntry>) -> Result<usize, StoreError> {
        let mut created = 0;
        for entry in remote.values() {
            for &sequel_id in &entry.sequels {
                let link = SequelLink {
                    title_id: entry.title_id,
                    sequel_id,
                };
                if self.store.ensure_sequel(link).await? {
                    created += 1;
                }
            }
        }
        Ok(created)
    }
}

//! Dub cache: the persisted records plus the freshness policy.
//!
//! Reads go through a small in-process front cache that absorbs repeated
//! lookups of the same title within one batch. The store stays
//! authoritative; every write goes to the store first and then replaces the
//! front entry.

use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::models::{DubRecord, DubUpsert, TitleId};
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Bounded, TTL-limited map of recently read records.
pub struct FrontCache {
    capacity: usize,
    ttl: std::time::Duration,
    entries: Mutex<HashMap<TitleId, (Instant, DubRecord)>>,
}

impl FrontCache {
    pub fn new(capacity: usize, ttl: std::time::Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TitleId, (Instant, DubRecord)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, title_id: TitleId) -> Option<DubRecord> {
        let mut entries = self.lock();
        if let Some((stored_at, record)) = entries.get(&title_id) {
            if stored_at.elapsed() < self.ttl {
                return Some(record.clone());
            }
            entries.remove(&title_id);
        }
        None
    }

    pub fn put(&self, record: DubRecord) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.lock();
        if !entries.contains_key(&record.title_id) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (stored_at, _))| *stored_at)
                    .map(|(id, _)| *id);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(record.title_id, (Instant::now(), record));
    }

    pub fn invalidate(&self, title_id: TitleId) {
        self.lock().remove(&title_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persisted dub records with the freshness rules applied on top.
pub struct DubCache {
    store: Arc<dyn Store>,
    front: FrontCache,
    freshness: Duration,
}

impl DubCache {
    pub fn new(store: Arc<dyn Store>, config: &CacheConfig) -> Self {
        Self {
            store,
            front: FrontCache::new(
                config.front_capacity,
                std::time::Duration::from_secs(config.front_ttl_secs),
            ),
            freshness: Duration::hours(config.freshness_hours),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn get(&self, title_id: TitleId) -> Result<Option<DubRecord>, StoreError> {
        if let Some(record) = self.front.get(title_id) {
            return Ok(Some(record));
        }

        let record = self.store.dub(title_id).await?;
        if let Some(record) = &record {
            self.front.put(record.clone());
        }
        Ok(record)
    }

    /// Records for the given titles. Titles without a record are left out.
    pub async fn find_by_ids(&self, title_ids: &[TitleId]) -> Result<Vec<DubRecord>, StoreError> {
        let records = self.store.dubs_by_ids(title_ids).await?;
        for record in &records {
            self.front.put(record.clone());
        }
        Ok(records)
    }

    pub async fn upsert(&self, upsert: DubUpsert) -> Result<DubRecord, StoreError> {
        let title_id = upsert.title_id;
        match self.store.upsert_dub(upsert).await {
            Ok(record) => {
                self.front.put(record.clone());
                Ok(record)
            }
            Err(e) => {
                self.front.invalidate(title_id);
                Err(e)
            }
        }
    }

    /// When the record stops being fresh, `None` if it never does.
    ///
    /// Complete dubs and finished titles without a dub never change again.
    /// A releasing dub goes stale at its next air time if that comes before
    /// the regular window ends.
    pub fn refresh_at(&self, record: &DubRecord) -> Option<DateTime<Utc>> {
        let state = &record.state;
        if state.is_complete() || (!state.has_dub && record.release_status.is_finished()) {
            return None;
        }

        let window_end = record.last_resolved_at + self.freshness;
        match state.next_air {
            Some(next_air) if state.is_releasing => Some(next_air.min(window_end)),
            _ => Some(window_end),
        }
    }

    pub fn is_fresh(&self, record: &DubRecord, now: DateTime<Utc>) -> bool {
        match self.refresh_at(record) {
            None => true,
            Some(refresh_at) => now < refresh_at,
        }
    }
}

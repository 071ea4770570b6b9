//! Persistence port.
//!
//! The engine only ever talks to a [`Store`]. Two adapters ship with the
//! crate: [`MemoryStore`] for tests and one-shot runs, and [`JsonStore`]
//! which keeps the same tables in a single JSON document on disk.

mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::models::{
    DubRecord, DubUpsert, RecordId, SequelLink, Subscription, TitleId, User, UserId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Predicates the sweep filters dub records by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DubFilter {
    /// Dubs currently airing.
    Releasing,
    /// No dub known and nothing airing; re-checked for late announcements.
    NoDubIdle,
}

impl DubFilter {
    pub fn matches(self, record: &DubRecord) -> bool {
        match self {
            DubFilter::Releasing => record.state.is_releasing,
            DubFilter::NoDubIdle => !record.state.has_dub && !record.state.is_releasing,
        }
    }
}

/// Read/write contract the engine needs from persistence.
#[async_trait]
pub trait Store: Send + Sync {
    async fn user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    async fn users(&self) -> Result<Vec<User>, StoreError>;

    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;

    /// Dub record of a title, if one was ever resolved.
    async fn dub(&self, title_id: TitleId) -> Result<Option<DubRecord>, StoreError>;

    /// Dub records for every listed title that has one.
    async fn dubs_by_ids(&self, title_ids: &[TitleId]) -> Result<Vec<DubRecord>, StoreError>;

    async fn dubs_where(&self, filter: DubFilter) -> Result<Vec<DubRecord>, StoreError>;

    /// Creates the record for a title or overwrites its resolved fields,
    /// keeping the record id stable.
    async fn upsert_dub(&self, upsert: DubUpsert) -> Result<DubRecord, StoreError>;

    /// Creates the subscription unless one exists for (user, title).
    /// Returns whether it was created.
    async fn ensure_subscription(&self, subscription: Subscription) -> Result<bool, StoreError>;

    async fn subscriptions_for_user(&self, user_id: UserId)
    -> Result<Vec<Subscription>, StoreError>;

    async fn subscriptions_for_title(
        &self,
        title_id: TitleId,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Deletes the user's subscriptions to the given titles. Returns how
    /// many were deleted.
    async fn delete_subscriptions(
        &self,
        user_id: UserId,
        title_ids: &[TitleId],
    ) -> Result<usize, StoreError>;

    /// Stores the edge unless it exists. Returns whether it was created.
    async fn ensure_sequel(&self, link: SequelLink) -> Result<bool, StoreError>;

    async fn sequels_of(&self, title_id: TitleId) -> Result<Vec<SequelLink>, StoreError>;
}

/// The tables shared by both adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Tables {
    users: BTreeMap<UserId, User>,
    dubs: BTreeMap<TitleId, DubRecord>,
    subscriptions: Vec<Subscription>,
    sequels: BTreeSet<(TitleId, TitleId)>,
    next_dub_id: RecordId,
}

impl Tables {
    fn user(&self, user_id: UserId) -> Option<User> {
        self.users.get(&user_id).cloned()
    }

    fn users(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    fn upsert_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    fn dub(&self, title_id: TitleId) -> Option<DubRecord> {
        self.dubs.get(&title_id).cloned()
    }

    fn dubs_by_ids(&self, title_ids: &[TitleId]) -> Vec<DubRecord> {
        let wanted: BTreeSet<TitleId> = title_ids.iter().copied().collect();
        wanted
            .into_iter()
            .filter_map(|id| self.dubs.get(&id).cloned())
            .collect()
    }

    fn dubs_where(&self, filter: DubFilter) -> Vec<DubRecord> {
        self.dubs
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    fn upsert_dub(&mut self, upsert: DubUpsert) -> DubRecord {
        let id = match self.dubs.get(&upsert.title_id) {
            Some(existing) => existing.id,
            None => {
                self.next_dub_id += 1;
                self.next_dub_id
            }
        };

        let record = DubRecord {
            id,
            title_id: upsert.title_id,
            name: upsert.name,
            schedule_slug: upsert.schedule_slug,
            cover_image: upsert.cover_image,
            release_status: upsert.release_status,
            state: upsert.state,
            last_resolved_at: upsert.resolved_at,
        };
        self.dubs.insert(record.title_id, record.clone());
        record
    }

    fn ensure_subscription(&mut self, subscription: Subscription) -> bool {
        let exists = self.subscriptions.iter().any(|s| {
            s.user_id == subscription.user_id && s.title_id == subscription.title_id
        });
        if !exists {
            self.subscriptions.push(subscription);
        }
        !exists
    }

    fn subscriptions_for_user(&self, user_id: UserId) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    fn subscriptions_for_title(&self, title_id: TitleId) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.title_id == title_id)
            .cloned()
            .collect()
    }

    fn delete_subscriptions(&mut self, user_id: UserId, title_ids: &[TitleId]) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|s| s.user_id != user_id || !title_ids.contains(&s.title_id));
        before - self.subscriptions.len()
    }

    fn ensure_sequel(&mut self, link: SequelLink) -> bool {
        self.sequels.insert((link.title_id, link.sequel_id))
    }

    fn sequels_of(&self, title_id: TitleId) -> Vec<SequelLink> {
        self.sequels
            .range((title_id, TitleId::MIN)..=(title_id, TitleId::MAX))
            .map(|&(title_id, sequel_id)| SequelLink {
                title_id,
                sequel_id,
            })
            .collect()
    }
}

//! In-process store.

use super::{DubFilter, Store, Tables};
use crate::error::StoreError;
use crate::models::{DubRecord, DubUpsert, SequelLink, Subscription, TitleId, User, UserId};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Store that keeps everything in memory. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.user(user_id))
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().await.users())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.tables.write().await.upsert_user(user);
        Ok(())
    }

    async fn dub(&self, title_id: TitleId) -> Result<Option<DubRecord>, StoreError> {
        Ok(self.tables.read().await.dub(title_id))
    }

    async fn dubs_by_ids(&self, title_ids: &[TitleId]) -> Result<Vec<DubRecord>, StoreError> {
        Ok(self.tables.read().await.dubs_by_ids(title_ids))
    }

    async fn dubs_where(&self, filter: DubFilter) -> Result<Vec<DubRecord>, StoreError> {
        Ok(self.tables.read().await.dubs_where(filter))
    }

    async fn upsert_dub(&self, upsert: DubUpsert) -> Result<DubRecord, StoreError> {
        Ok(self.tables.write().await.upsert_dub(upsert))
    }

    async fn ensure_subscription(&self, subscription: Subscription) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.ensure_subscription(subscription))
    }

    async fn subscriptions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.tables.read().await.subscriptions_for_user(user_id))
    }

    async fn subscriptions_for_title(
        &self,
        title_id: TitleId,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.tables.read().await.subscriptions_for_title(title_id))
    }

    async fn delete_subscriptions(
        &self,
        user_id: UserId,
        title_ids: &[TitleId],
    ) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .delete_subscriptions(user_id, title_ids))
    }

    async fn ensure_sequel(&self, link: SequelLink) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.ensure_sequel(link))
    }

    async fn sequels_of(&self, title_id: TitleId) -> Result<Vec<SequelLink>, StoreError> {
        Ok(self.tables.read().await.sequels_of(title_id))
    }
}

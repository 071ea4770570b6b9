//! Store persisted as a single JSON document.

use super::{DubFilter, Store, Tables};
use crate::error::StoreError;
use crate::models::{DubRecord, DubUpsert, SequelLink, Subscription, TitleId, User, UserId};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// File-backed store.
///
/// Every write rewrites the whole document: the new content goes to a
/// sibling temp file which is then renamed over the old one, so a crash
/// mid-write leaves the previous state intact. Changes are applied to a copy
/// of the tables and only become visible once the file is in place; writes
/// hold the table lock until then.
pub struct JsonStore {
    path: PathBuf,
    tables: RwLock<Tables>,
}

impl JsonStore {
    /// Opens the store at `path`, starting empty if the file doesn't exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let tables: Tables = serde_json::from_str(&content)?;
            info!(path = %path.display(), "loaded store");
            tables
        } else {
            info!(path = %path.display(), "starting with an empty store");
            Tables::default()
        };

        Ok(Self {
            path,
            tables: RwLock::new(tables),
        })
    }

    async fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(tables)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), "store persisted");
        Ok(())
    }

    /// Applies `change` to a copy of the tables, persists it, then swaps it in.
    ///
    /// A failed persist leaves the in-memory tables untouched.
    async fn write<T>(&self, change: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let out = change(&mut staged);
        self.persist(&staged).await?;
        *tables = staged;
        Ok(out)
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.user(user_id))
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().await.users())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.write(|t| t.upsert_user(user)).await
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
        self.write(|t| t.upsert_dub(upsert)).await
    }

    async fn ensure_subscription(&self, subscription: Subscription) -> Result<bool, StoreError> {
        self.write(|t| t.ensure_subscription(subscription)).await
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
        self.write(|t| t.delete_subscriptions(user_id, title_ids))
            .await
    }

    async fn ensure_sequel(&self, link: SequelLink) -> Result<bool, StoreError> {
        self.write(|t| t.ensure_sequel(link)).await
    }

    async fn sequels_of(&self, title_id: TitleId) -> Result<Vec<SequelLink>, StoreError> {
        Ok(self.tables.read().await.sequels_of(title_id))
    }
}

//! Entity directory: facts the deriver needs about repositories and users

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::persistence::StoreError;

/// What the deriver knows about a repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RepositoryRecord {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub name: String,
}

/// Per-user notification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct UserSettings {
    #[serde(default = "enabled")]
    pub notifications_enabled: bool,
}

fn enabled() -> bool {
    true
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
        }
    }
}

/// Entity facts owned by other services
///
/// Entities are created and mutated elsewhere. Collaborators push the facts
/// the change feed needs through the upserts; the deriver only reads them to
/// resolve recipients and render templates.
#[async_trait]
pub trait EntityDirectory: Send + Sync + 'static {
    async fn repository(&self, repository_id: &str) -> Result<Option<RepositoryRecord>, StoreError>;

    /// Whether the user accepts notifications; unknown users do
    async fn notifications_enabled(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Insert or replace a repository, keyed by its id
    async fn upsert_repository(&self, repository: RepositoryRecord) -> Result<(), StoreError>;

    async fn upsert_user_settings(
        &self,
        user_id: &str,
        settings: UserSettings,
    ) -> Result<(), StoreError>;
}

/// In-memory directory, fed by collaborators as entities change
#[derive(Default)]
pub struct InMemoryDirectory {
    repositories: DashMap<String, RepositoryRecord>,
    settings: DashMap<String, UserSettings>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_repository(&self, repository: RepositoryRecord) {
        self.repositories.insert(repository.id.clone(), repository);
    }

    pub fn put_user_settings(&self, user_id: impl Into<String>, settings: UserSettings) {
        self.settings.insert(user_id.into(), settings);
    }
}

#[async_trait]
impl EntityDirectory for InMemoryDirectory {
    async fn repository(&self, repository_id: &str) -> Result<Option<RepositoryRecord>, StoreError> {
        Ok(self.repositories.get(repository_id).map(|r| r.value().clone()))
    }

    async fn notifications_enabled(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .settings
            .get(user_id)
            .map(|s| s.notifications_enabled)
            .unwrap_or(true))
    }

    async fn upsert_repository(&self, repository: RepositoryRecord) -> Result<(), StoreError> {
        self.put_repository(repository);
        Ok(())
    }

    async fn upsert_user_settings(
        &self,
        user_id: &str,
        settings: UserSettings,
    ) -> Result<(), StoreError> {
        self.put_user_settings(user_id, settings);
        Ok(())
    }
}

//! Grant and template persistence.
//!
//! The in-memory stores back tests and single-node development; the Postgres
//! adapters live in `brokerage-infra`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use brokerage_core::{GrantId, StoreError, TemplateId, UserId};

use crate::grants::{GrantAction, GrantOutcome, NewGrant, PermissionGrant, PermissionTemplate};
use crate::Permission;

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert the `(user_id, permission)` row, or reactivate and overwrite it
    /// if it already exists, as one atomic step.
    async fn upsert(&self, grant: NewGrant) -> Result<GrantOutcome, StoreError>;

    /// Soft-revoke the `(user_id, permission)` row. Returns the number of rows updated.
    async fn deactivate(
        &self,
        user_id: UserId,
        permission: &Permission,
        revoked_by: UserId,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Grants of `user_id` that are effective at `now`.
    async fn effective_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionGrant>, StoreError>;

    /// Every grant row of `user_id`, active or not, oldest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PermissionGrant>, StoreError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, id: TemplateId) -> Result<Option<PermissionTemplate>, StoreError>;

    async fn list(&self) -> Result<Vec<PermissionTemplate>, StoreError>;

    async fn save(&self, template: PermissionTemplate) -> Result<(), StoreError>;
}

fn poisoned() -> StoreError {
    StoreError::unavailable("in-memory store lock poisoned")
}

/// In-memory grant store. The map key is the uniqueness constraint.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    rows: RwLock<HashMap<(UserId, Permission), PermissionGrant>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total rows, active or not.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn upsert(&self, grant: NewGrant) -> Result<GrantOutcome, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let key = (grant.user_id, grant.permission.clone());

        if let Some(existing) = rows.get_mut(&key) {
            existing.restrictions = grant.restrictions;
            existing.expires_at = grant.expires_at;
            existing.granted_by = grant.granted_by;
            existing.granted_at = grant.granted_at;
            existing.is_active = true;
            existing.revoked_by = None;
            existing.revoked_at = None;
            return Ok(GrantOutcome {
                action: GrantAction::Updated,
                grant: existing.clone(),
            });
        }

        let row = PermissionGrant {
            id: GrantId::new(),
            user_id: grant.user_id,
            permission: grant.permission,
            restrictions: grant.restrictions,
            granted_by: grant.granted_by,
            granted_at: grant.granted_at,
            expires_at: grant.expires_at,
            is_active: true,
            revoked_by: None,
            revoked_at: None,
        };
        rows.insert(key, row.clone());
        Ok(GrantOutcome {
            action: GrantAction::Created,
            grant: row,
        })
    }

    async fn deactivate(
        &self,
        user_id: UserId,
        permission: &Permission,
        revoked_by: UserId,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        match rows.get_mut(&(user_id, permission.clone())) {
            Some(row) => {
                row.is_active = false;
                row.revoked_by = Some(revoked_by);
                row.revoked_at = Some(revoked_at);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn effective_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut grants: Vec<_> = rows
            .values()
            .filter(|g| g.user_id == user_id && g.is_effective(now))
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.granted_at);
        Ok(grants)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PermissionGrant>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut grants: Vec<_> = rows.values().filter(|g| g.user_id == user_id).cloned().collect();
        grants.sort_by_key(|g| g.granted_at);
        Ok(grants)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<TemplateId, PermissionTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(&self, id: TemplateId) -> Result<Option<PermissionTemplate>, StoreError> {
        let templates = self.templates.read().map_err(|_| poisoned())?;
        Ok(templates.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<PermissionTemplate>, StoreError> {
        let templates = self.templates.read().map_err(|_| poisoned())?;
        let mut all: Vec<_> = templates.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn save(&self, template: PermissionTemplate) -> Result<(), StoreError> {
        let mut templates = self.templates.write().map_err(|_| poisoned())?;
        templates.insert(template.id, template);
        Ok(())
    }
}

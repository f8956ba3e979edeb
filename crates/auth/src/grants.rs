//! Per-user permission grants layered on top of role permissions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, instrument, warn};

use brokerage_core::{GrantId, StoreError, TemplateId, UserId};

use crate::store::{GrantStore, TemplateStore};
use crate::Permission;

/// A persisted grant. Rows are soft-revoked, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: GrantId,
    pub user_id: UserId,
    pub permission: Permission,
    /// Free-form constraints recorded with the grant (e.g. a listing id range).
    pub restrictions: Option<JsonValue>,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_by: Option<UserId>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    /// Active and not yet expired at `now`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// A named bundle of permissions applied to a user in one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub is_active: bool,
}

/// Upsert input handed to a [`GrantStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewGrant {
    pub user_id: UserId,
    pub permission: Permission,
    pub restrictions: Option<JsonValue>,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantOptions {
    #[serde(default)]
    pub restrictions: Option<JsonValue>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrantOutcome {
    pub action: GrantAction,
    pub grant: PermissionGrant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateFailure {
    pub permission: Permission,
    pub error: String,
}

/// Aggregate result of applying a template.
///
/// `permissions_granted + permissions_updated + failures.len() == total_permissions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateApplication {
    pub template_id: TemplateId,
    pub permissions_granted: usize,
    pub permissions_updated: usize,
    pub total_permissions: usize,
    pub failures: Vec<TemplateFailure>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrantError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Grant, revoke and template operations over the grant/template stores.
#[derive(Clone)]
pub struct GrantService {
    grants: Arc<dyn GrantStore>,
    templates: Arc<dyn TemplateStore>,
}

impl GrantService {
    pub fn new(grants: Arc<dyn GrantStore>, templates: Arc<dyn TemplateStore>) -> Self {
        Self { grants, templates }
    }

    /// Create the `(user_id, permission)` grant, or reactivate and overwrite
    /// an existing one.
    #[instrument(skip_all, fields(%user_id, %permission, %granted_by), err)]
    pub async fn grant_permission(
        &self,
        user_id: UserId,
        permission: &str,
        granted_by: UserId,
        options: GrantOptions,
    ) -> Result<GrantOutcome, GrantError> {
        let permission =
            Permission::parse(permission.to_string()).map_err(|e| GrantError::Validation(e.to_string()))?;

        let now = Utc::now();
        if let Some(expires_at) = options.expires_at {
            if expires_at <= now {
                return Err(GrantError::Validation("expires_at must be in the future".to_string()));
            }
        }

        let outcome = self
            .grants
            .upsert(NewGrant {
                user_id,
                permission,
                restrictions: options.restrictions,
                granted_by,
                granted_at: now,
                expires_at: options.expires_at,
            })
            .await?;

        info!(action = ?outcome.action, grant_id = %outcome.grant.id, "permission granted");
        Ok(outcome)
    }

    /// Soft-revoke the `(user_id, permission)` grant.
    #[instrument(skip_all, fields(%user_id, %permission, %revoked_by), err)]
    pub async fn revoke_permission(
        &self,
        user_id: UserId,
        permission: &str,
        revoked_by: UserId,
    ) -> Result<(), GrantError> {
        let permission = Permission::new(permission.to_string());
        let updated = self
            .grants
            .deactivate(user_id, &permission, revoked_by, Utc::now())
            .await?;

        if updated == 0 {
            return Err(GrantError::NotFound(format!(
                "no grant of '{permission}' for user {user_id}"
            )));
        }

        info!("permission revoked");
        Ok(())
    }

    /// Grant every permission of an active template. A failing item is
    /// recorded and the remaining items are still applied.
    #[instrument(skip_all, fields(%user_id, %template_id, %granted_by), err)]
    pub async fn apply_permission_template(
        &self,
        user_id: UserId,
        template_id: TemplateId,
        granted_by: UserId,
    ) -> Result<TemplateApplication, GrantError> {
        let template = self
            .templates
            .get(template_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or_else(|| GrantError::NotFound(format!("no active template {template_id}")))?;

        let mut application = TemplateApplication {
            template_id,
            permissions_granted: 0,
            permissions_updated: 0,
            total_permissions: template.permissions.len(),
            failures: Vec::new(),
        };

        for permission in &template.permissions {
            match self
                .grant_permission(user_id, permission.as_str(), granted_by, GrantOptions::default())
                .await
            {
                Ok(GrantOutcome {
                    action: GrantAction::Created,
                    ..
                }) => application.permissions_granted += 1,
                Ok(GrantOutcome {
                    action: GrantAction::Updated,
                    ..
                }) => application.permissions_updated += 1,
                Err(e) => {
                    warn!(%permission, error = %e, "template item failed");
                    application.failures.push(TemplateFailure {
                        permission: permission.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            granted = application.permissions_granted,
            updated = application.permissions_updated,
            failed = application.failures.len(),
            "template applied"
        );
        Ok(application)
    }

    pub async fn list_grants(&self, user_id: UserId) -> Result<Vec<PermissionGrant>, GrantError> {
        Ok(self.grants.list_for_user(user_id).await?)
    }

    pub async fn list_templates(&self) -> Result<Vec<PermissionTemplate>, GrantError> {
        Ok(self.templates.list().await?)
    }
}

//! Effective permission resolution: role catalog ∪ effective grants.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use brokerage_core::UserId;

use crate::authorize::{self, AuthorizationExplanation, BranchPolicy, Decision, MatchRule};
use crate::grants::PermissionGrant;
use crate::store::GrantStore;
use crate::{Permission, PermissionContext, PermissionSet, Role, RoleCatalog};

/// Everything a user may do right now, and where each permission came from.
#[derive(Debug, Clone, Serialize)]
pub struct EffectivePermissions {
    pub user_id: UserId,
    pub role: Role,
    pub role_permissions: Vec<Permission>,
    pub custom_permissions: Vec<Permission>,
    /// Role permissions first, then grants not already present.
    pub all_permissions: Vec<Permission>,
    pub custom_details: Vec<PermissionGrant>,
    /// Grants could not be read; only role permissions are included.
    pub degraded: bool,
    #[serde(skip)]
    compiled: PermissionSet,
}

impl EffectivePermissions {
    /// Merge role permissions with the grants that are effective at `now`.
    pub fn merge(
        user_id: UserId,
        role: Role,
        role_permissions: &[Permission],
        grants: Vec<PermissionGrant>,
        now: DateTime<Utc>,
    ) -> Self {
        let custom_details: Vec<PermissionGrant> = grants.into_iter().filter(|g| g.is_effective(now)).collect();
        let custom_permissions: Vec<Permission> = custom_details.iter().map(|g| g.permission.clone()).collect();

        let mut all_permissions: Vec<Permission> = Vec::with_capacity(role_permissions.len() + custom_permissions.len());
        for permission in role_permissions.iter().chain(custom_permissions.iter()) {
            if !all_permissions.contains(permission) {
                all_permissions.push(permission.clone());
            }
        }

        let compiled = PermissionSet::compile(&all_permissions);
        Self {
            user_id,
            role,
            role_permissions: role_permissions.to_vec(),
            custom_permissions,
            all_permissions,
            custom_details,
            degraded: false,
            compiled,
        }
    }

    fn role_only(user_id: UserId, role: Role, role_permissions: &[Permission]) -> Self {
        let mut effective = Self::merge(user_id, role, role_permissions, Vec::new(), Utc::now());
        effective.degraded = true;
        effective
    }

    pub fn permission_set(&self) -> &PermissionSet {
        &self.compiled
    }
}

/// Resolves and checks permissions for a user.
#[derive(Clone)]
pub struct PermissionResolver {
    grants: Arc<dyn GrantStore>,
    catalog: Arc<RoleCatalog>,
    branch_policy: BranchPolicy,
}

impl PermissionResolver {
    pub fn new(grants: Arc<dyn GrantStore>, catalog: Arc<RoleCatalog>) -> Self {
        Self {
            grants,
            catalog,
            branch_policy: BranchPolicy::default(),
        }
    }

    pub fn with_branch_policy(mut self, branch_policy: BranchPolicy) -> Self {
        self.branch_policy = branch_policy;
        self
    }

    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }

    /// Resolve `user_id`'s permissions. Never fails: if grants cannot be read
    /// the result holds role permissions only and is marked `degraded`.
    pub async fn user_permissions(&self, user_id: UserId, role: &Role) -> EffectivePermissions {
        let role_permissions = self.catalog.permissions_for(role);
        if role_permissions.is_empty() {
            debug!(%user_id, %role, "role has no catalog permissions");
        }

        let now = Utc::now();
        match self.grants.effective_for_user(user_id, now).await {
            Ok(grants) => EffectivePermissions::merge(user_id, role.clone(), role_permissions, grants, now),
            Err(e) => {
                warn!(%user_id, error = %e, "grant lookup failed; using role permissions only");
                EffectivePermissions::role_only(user_id, role.clone(), role_permissions)
            }
        }
    }

    /// Resolve and check a single permission.
    pub async fn has_permission(
        &self,
        user_id: UserId,
        role: &Role,
        permission: &Permission,
        context: &PermissionContext,
    ) -> bool {
        let effective = self.user_permissions(user_id, role).await;
        self.evaluate(&effective, permission, context).is_allowed()
    }

    /// Check against an already resolved permission set.
    pub fn evaluate(
        &self,
        effective: &EffectivePermissions,
        permission: &Permission,
        context: &PermissionContext,
    ) -> Decision {
        authorize::evaluate(
            effective.user_id,
            &effective.role,
            effective.permission_set(),
            permission,
            context,
            &self.branch_policy,
        )
    }

    /// First of `required` that is allowed, with the rule that allowed it.
    /// Stops at the first match.
    pub fn first_allowed<'a>(
        &self,
        effective: &EffectivePermissions,
        required: &'a [Permission],
        context: &PermissionContext,
    ) -> Option<(&'a Permission, MatchRule)> {
        required.iter().find_map(|permission| match self.evaluate(effective, permission, context) {
            Decision::Allowed(rule) => Some((permission, rule)),
            Decision::Denied => None,
        })
    }

    pub fn explain(
        &self,
        effective: &EffectivePermissions,
        permission: &Permission,
        context: &PermissionContext,
    ) -> AuthorizationExplanation {
        let decision = self.evaluate(effective, permission, context);
        AuthorizationExplanation {
            user_id: effective.user_id,
            role: effective.role.clone(),
            required_permission: permission.clone(),
            granted: decision.is_allowed(),
            reason: authorize::describe(&decision, permission),
            matched_rule: decision.rule().cloned(),
            effective_permissions: effective.all_permissions.clone(),
            degraded: effective.degraded,
        }
    }
}

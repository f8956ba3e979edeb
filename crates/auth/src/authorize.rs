use serde::{Deserialize, Serialize};

use brokerage_core::UserId;

use crate::{Permission, PermissionContext, PermissionSet, Role};

/// Which rule allowed a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MatchRule {
    /// The actor holds `*`.
    Global,
    /// The actor holds exactly the requested permission.
    Exact,
    /// A held `prefix:*` covers the requested permission.
    Wildcard { pattern: Permission },
    /// The actor holds the `:own` permission and owns the resource.
    Ownership,
    /// Branch-wide allowance for the configured role.
    BranchScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed(MatchRule),
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed(_))
    }

    pub fn rule(&self) -> Option<&MatchRule> {
        match self {
            Decision::Allowed(rule) => Some(rule),
            Decision::Denied => None,
        }
    }
}

/// Coarse branch-wide allowance: a role acting inside a branch may use any
/// non-owner-scoped permission on the listed resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPolicy {
    pub enabled: bool,
    pub role: Role,
    pub resources: Vec<String>,
}

impl BranchPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn allows(&self, role: &Role, requested: &Permission, context: &PermissionContext) -> bool {
        self.enabled
            && *role == self.role
            && context.branch_code.is_some()
            && !requested.is_owner_scoped()
            && self.resources.iter().any(|r| r == requested.resource())
    }
}

impl Default for BranchPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            role: Role::MANAGER,
            resources: vec!["properties".to_string(), "customers".to_string()],
        }
    }
}

/// Decide whether `actor_id` (with `role` and compiled `held` permissions) may
/// use `requested` in `context`.
///
/// Rules run in a fixed order and the first match wins; anything unmatched is
/// denied:
///
/// 1. global `*`
/// 2. exact match; an owner-scoped request only matches here when the
///    context names no owner
/// 3. held wildcard covering the request
/// 4. owner-scoped request, held exactly, and the actor owns the resource
/// 5. branch policy
///
/// - No IO
/// - No side effects
pub fn evaluate(
    actor_id: UserId,
    role: &Role,
    held: &PermissionSet,
    requested: &Permission,
    context: &PermissionContext,
    branch: &BranchPolicy,
) -> Decision {
    if held.is_global() {
        return Decision::Allowed(MatchRule::Global);
    }

    let owner_scoped = requested.is_owner_scoped();

    if held.contains(requested) && (!owner_scoped || context.owner_id.is_none()) {
        return Decision::Allowed(MatchRule::Exact);
    }

    if let Some(pattern) = held.wildcard_covering(requested) {
        return Decision::Allowed(MatchRule::Wildcard {
            pattern: pattern.clone(),
        });
    }

    if owner_scoped && held.contains(requested) && context.owner_id == Some(actor_id) {
        return Decision::Allowed(MatchRule::Ownership);
    }

    if branch.allows(role, requested, context) {
        return Decision::Allowed(MatchRule::BranchScope);
    }

    Decision::Denied
}

/// Why a permission check came out the way it did.
///
/// Served to administrators debugging access; never returned to the denied
/// caller.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub user_id: UserId,
    pub role: Role,
    pub required_permission: Permission,
    pub granted: bool,
    pub matched_rule: Option<MatchRule>,
    pub reason: String,
    pub effective_permissions: Vec<Permission>,
    /// Grants could not be read; only role permissions were considered.
    pub degraded: bool,
}

pub(crate) fn describe(decision: &Decision, requested: &Permission) -> String {
    match decision {
        Decision::Allowed(MatchRule::Global) => "holds the global permission '*'".to_string(),
        Decision::Allowed(MatchRule::Exact) => format!("holds '{requested}'"),
        Decision::Allowed(MatchRule::Wildcard { pattern }) => {
            format!("'{pattern}' covers '{requested}'")
        }
        Decision::Allowed(MatchRule::Ownership) => {
            format!("holds '{requested}' and owns the resource")
        }
        Decision::Allowed(MatchRule::BranchScope) => {
            format!("branch-wide allowance covers '{requested}'")
        }
        Decision::Denied => format!("no held permission authorizes '{requested}'"),
    }
}

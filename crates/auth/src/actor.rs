use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerage_core::UserId;

use crate::Role;

/// The authenticated principal making a request.
///
/// Attached by the authentication layer; everything downstream (session guard,
/// permission gate, audit recorder) reads it and never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub branch_code: Option<String>,
    /// When the credential presented with this request was issued.
    pub token_issued_at: DateTime<Utc>,
}

/// Runtime facts used by the contextual permission rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionContext {
    /// Owner of the resource being acted on. Owner-scoped (`:own`) permissions
    /// only apply when this equals the acting user.
    pub owner_id: Option<UserId>,
    /// Branch the request is scoped to.
    pub branch_code: Option<String>,
}

impl PermissionContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn owned_by(owner_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            branch_code: None,
        }
    }

    pub fn in_branch(branch_code: impl Into<String>) -> Self {
        Self {
            owner_id: None,
            branch_code: Some(branch_code.into()),
        }
    }

    pub fn with_owner(mut self, owner_id: UserId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Context derived from the actor alone: their branch, no resource owner.
    pub fn for_actor(actor: &Actor) -> Self {
        Self {
            owner_id: None,
            branch_code: actor.branch_code.clone(),
        }
    }
}

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use brokerage_audit::{AuditQuery, HandlerResponse};
use brokerage_core::{TemplateId, UserId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub permission: String,
    #[serde(default)]
    pub restrictions: Option<Value>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub permission: String,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    /// Defaults to the target user's own branch.
    #[serde(default)]
    pub branch_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub ip: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogParams {
    pub actor_id: Option<UserId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditLogParams {
    pub fn into_query(self) -> AuditQuery {
        AuditQuery {
            actor_id: self.actor_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            action: self.action,
            created_after: self.created_after,
            created_before: self.created_before,
            ..AuditQuery::default()
        }
        .page(self.limit, self.offset)
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_user_id(raw: &str) -> Result<UserId, HandlerResponse> {
    raw.parse::<UserId>().map_err(|_| {
        errors::handler_error(StatusCode::BAD_REQUEST, "invalid_id", format!("'{raw}' is not a valid user id"))
    })
}

pub fn parse_template_id(raw: &str) -> Result<TemplateId, HandlerResponse> {
    raw.parse::<TemplateId>().map_err(|_| {
        errors::handler_error(StatusCode::BAD_REQUEST, "invalid_id", format!("'{raw}' is not a valid template id"))
    })
}

/// Decode a raw JSON body inside an audited handler.
pub fn parse_body<T: DeserializeOwned>(raw: &[u8]) -> Result<T, HandlerResponse> {
    serde_json::from_slice(raw)
        .map_err(|e| errors::handler_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

/// The body as recorded in the audit entry. Bodies that are not JSON are left
/// out, since they cannot be scrubbed.
pub fn audit_body(raw: &[u8]) -> Option<Value> {
    serde_json::from_slice(raw).ok()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use brokerage_core::{AuditEntryId, UserId};

use crate::AuditAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Severity::High => f.write_str("HIGH"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub status_code: u16,
    /// `status_code` is 2xx.
    pub success: bool,
    pub request_data: Option<Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// One privileged action. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub actor_id: Option<UserId>,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub action: AuditAction,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub metadata: AuditMetadata,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn is_critical(&self) -> bool {
        self.metadata.severity == Some(Severity::High)
    }
}

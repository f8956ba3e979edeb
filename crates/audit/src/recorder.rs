//! Handler wrapper that records one audit entry per call.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{instrument, warn};

use brokerage_core::{AuditEntryId, UserId};

use crate::{
    AuditAction, AuditLogEntry, AuditMetadata, AuditStats, AuditWriter, Severity, SnapshotPolicy, SnapshotSource,
};

/// Request facts the recorder stores alongside the action.
#[derive(Debug, Clone, Default)]
pub struct AuditRequest {
    pub actor_id: Option<UserId>,
    /// Id of the entity the action targets, if it already exists.
    pub entity_id: Option<String>,
    pub body: Option<Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// What an audited handler produced: a status code and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    pub status: u16,
    pub body: Value,
}

impl HandlerResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    writer: AuditWriter,
    snapshots: Arc<dyn SnapshotSource>,
    policy: Arc<SnapshotPolicy>,
}

impl AuditRecorder {
    /// Entity type recorded by `audit_user_action`.
    pub const USER_ENTITY: &'static str = "user";

    pub fn new(writer: AuditWriter, snapshots: Arc<dyn SnapshotSource>, policy: SnapshotPolicy) -> Self {
        Self {
            writer,
            snapshots,
            policy: Arc::new(policy),
        }
    }

    /// Run `handler` and record the action against a user entity.
    pub async fn audit_user_action<F, Fut>(
        &self,
        action: impl Into<AuditAction>,
        request: AuditRequest,
        handler: F,
    ) -> HandlerResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResponse>,
    {
        self.record(action.into(), Self::USER_ENTITY, None, request, handler).await
    }

    /// Like `audit_user_action`, but the action is stored as `CRITICAL_<action>`
    /// with `HIGH` severity.
    pub async fn audit_critical_action<F, Fut>(
        &self,
        action: impl Into<AuditAction>,
        entity_type: &str,
        request: AuditRequest,
        handler: F,
    ) -> HandlerResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResponse>,
    {
        self.record(action.into().critical(), entity_type, Some(Severity::High), request, handler)
            .await
    }

    pub fn stats(&self) -> AuditStats {
        self.writer.stats()
    }

    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    async fn record<F, Fut>(
        &self,
        action: AuditAction,
        entity_type: &str,
        severity: Option<Severity>,
        request: AuditRequest,
        handler: F,
    ) -> HandlerResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResponse>,
    {
        let before_state = match &request.entity_id {
            Some(entity_id) if action.is_mutation_of_existing() => self.before_state(entity_type, entity_id).await,
            _ => None,
        };

        let response = handler().await;

        let entry = AuditLogEntry {
            id: AuditEntryId::new(),
            actor_id: request.actor_id,
            entity_type: entity_type.to_string(),
            entity_id: request.entity_id,
            action,
            before_state,
            after_state: Some(response.body.clone()),
            metadata: AuditMetadata {
                status_code: response.status,
                success: response.is_success(),
                request_data: request.body.map(|body| self.policy.scrub_request(body)),
                ip: request.ip,
                user_agent: request.user_agent,
                severity,
            },
            created_at: Utc::now(),
        };
        self.writer.submit(entry);

        response
    }

    #[instrument(skip(self), level = "debug")]
    async fn before_state(&self, entity_type: &str, entity_id: &str) -> Option<Value> {
        if !self.policy.covers(entity_type) {
            return None;
        }
        match self.snapshots.fetch(entity_type, entity_id).await {
            Ok(Some(snapshot)) => self.policy.restrict(entity_type, snapshot),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "before-state snapshot unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryAuditLog, InMemorySnapshotSource};
    use serde_json::json;

    fn recorder() -> (AuditRecorder, Arc<InMemoryAuditLog>, Arc<InMemorySnapshotSource>) {
        let log = InMemoryAuditLog::arc();
        let snapshots = InMemorySnapshotSource::arc();
        let recorder = AuditRecorder::new(
            AuditWriter::spawn(log.clone(), 32),
            snapshots.clone(),
            SnapshotPolicy::brokerage(),
        );
        (recorder, log, snapshots)
    }

    fn request(actor: UserId, entity_id: &str) -> AuditRequest {
        AuditRequest {
            actor_id: Some(actor),
            entity_id: Some(entity_id.to_string()),
            body: Some(json!({"reason": "left the company", "password": "hunter2"})),
            ip: Some("10.0.0.9".to_string()),
            user_agent: Some("admin-console/1.0".to_string()),
        }
    }

    #[tokio::test]
    async fn delete_records_before_and_after_state() {
        let (recorder, log, snapshots) = recorder();
        let actor = UserId::new();
        snapshots.insert(
            "user",
            "u-42",
            json!({"id": "u-42", "email": "gone@example.com", "password_hash": "secret", "status": "active"}),
        );

        let response = recorder
            .audit_user_action(AuditAction::DELETE, request(actor, "u-42"), || async {
                HandlerResponse::new(200, json!({"deleted": true, "id": "u-42"}))
            })
            .await;
        recorder.flush().await;

        assert_eq!(response.status, 200);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.action, AuditAction::DELETE);
        assert_eq!(entry.entity_type, "user");
        assert_eq!(entry.actor_id, Some(actor));
        assert_eq!(
            entry.before_state,
            Some(json!({"id": "u-42", "email": "gone@example.com", "status": "active"}))
        );
        assert_eq!(entry.after_state, Some(response.body.clone()));
        assert!(entry.metadata.success);
        assert_eq!(entry.metadata.severity, None);
        assert_eq!(entry.metadata.ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(
            entry.metadata.request_data,
            Some(json!({"reason": "left the company", "password": SnapshotPolicy::REDACTED}))
        );
    }

    #[tokio::test]
    async fn critical_action_is_prefixed_and_high_severity() {
        let (recorder, log, _) = recorder();

        recorder
            .audit_critical_action(
                AuditAction::GRANT_PERMISSION,
                "permission_grant",
                request(UserId::new(), "u-7"),
                || async { HandlerResponse::new(201, json!({"action": "created"})) },
            )
            .await;
        recorder.flush().await;

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action.as_str(), "CRITICAL_GRANT_PERMISSION");
        assert_eq!(entries[0].entity_type, "permission_grant");
        assert_eq!(entries[0].metadata.severity, Some(Severity::High));
        assert!(entries[0].is_critical());
        assert_eq!(entries[0].before_state, None);
    }

    #[tokio::test]
    async fn failed_handler_is_recorded_as_unsuccessful() {
        let (recorder, log, _) = recorder();

        let response = recorder
            .audit_user_action(AuditAction::UPDATE, request(UserId::new(), "missing"), || async {
                HandlerResponse::new(404, json!({"error": "not_found"}))
            })
            .await;
        recorder.flush().await;

        assert_eq!(response.status, 404);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].metadata.success);
        assert_eq!(entries[0].metadata.status_code, 404);
        assert_eq!(entries[0].before_state, None);
    }

    #[tokio::test]
    async fn create_actions_skip_the_snapshot() {
        let (recorder, log, snapshots) = recorder();
        snapshots.insert("user", "u-1", json!({"id": "u-1"}));

        recorder
            .audit_user_action("CREATE", request(UserId::new(), "u-1"), || async {
                HandlerResponse::new(201, json!({"id": "u-1"}))
            })
            .await;
        recorder.flush().await;

        assert_eq!(log.entries()[0].before_state, None);
        assert_eq!(recorder.stats().written, 1);
    }
}

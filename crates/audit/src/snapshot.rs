//! Before-state snapshots.
//!
//! Snapshots are reduced to an explicit per-entity allow-list before they are
//! stored, so columns such as `password_hash` never reach the audit log.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use brokerage_core::StoreError;

/// Loads the current state of an entity as JSON.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<Option<Value>, StoreError>;
}

/// Fields allowed into snapshots, per entity type. Entity types without an
/// entry are never snapshotted.
#[derive(Debug, Clone)]
pub struct SnapshotPolicy {
    fields: HashMap<String, Vec<String>>,
    /// Request-body keys replaced by `"[REDACTED]"` before the body is logged.
    redacted_request_keys: Vec<String>,
}

impl SnapshotPolicy {
    pub const REDACTED: &'static str = "[REDACTED]";

    pub fn empty() -> Self {
        Self {
            fields: HashMap::new(),
            redacted_request_keys: Vec::new(),
        }
    }

    pub fn with_entity<I, S>(mut self, entity_type: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .insert(entity_type.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_redacted_request_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redacted_request_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn covers(&self, entity_type: &str) -> bool {
        self.fields.contains_key(entity_type)
    }

    /// Keep only allow-listed top-level fields. `None` for unlisted entity
    /// types and non-object values.
    pub fn restrict(&self, entity_type: &str, snapshot: Value) -> Option<Value> {
        let allowed = self.fields.get(entity_type)?;
        let Value::Object(object) = snapshot else {
            return None;
        };
        let kept: Map<String, Value> = object
            .into_iter()
            .filter(|(key, _)| allowed.iter().any(|f| f == key))
            .collect();
        Some(Value::Object(kept))
    }

    /// Mask secret-bearing keys anywhere in a request body.
    pub fn scrub_request(&self, body: Value) -> Value {
        match body {
            Value::Object(object) => Value::Object(
                object
                    .into_iter()
                    .map(|(key, value)| {
                        if self.redacted_request_keys.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
                            (key, Value::String(Self::REDACTED.to_string()))
                        } else {
                            (key, self.scrub_request(value))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.scrub_request(v)).collect()),
            other => other,
        }
    }

    /// Allow-lists for the brokerage entities.
    pub fn brokerage() -> Self {
        Self::empty()
            .with_entity(
                "user",
                [
                    "id",
                    "email",
                    "first_name",
                    "last_name",
                    "role",
                    "branch_code",
                    "status",
                    "force_password_change",
                    "last_password_change",
                    "created_at",
                    "updated_at",
                ],
            )
            .with_entity(
                "property",
                [
                    "id", "title", "status", "price", "address", "city", "agent_id", "branch_code", "updated_at",
                ],
            )
            .with_entity(
                "customer",
                ["id", "first_name", "last_name", "email", "phone", "agent_id", "status", "updated_at"],
            )
            .with_entity(
                "booking",
                ["id", "property_id", "customer_id", "agent_id", "status", "scheduled_at", "updated_at"],
            )
            .with_redacted_request_keys([
                "password",
                "current_password",
                "new_password",
                "password_hash",
                "token",
                "refresh_token",
            ])
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::brokerage()
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotSource {
    rows: RwLock<HashMap<(String, String), Value>>,
}

impl InMemorySnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert(&self, entity_type: impl Into<String>, entity_id: impl Into<String>, state: Value) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert((entity_type.into(), entity_id.into()), state);
        }
    }
}

#[async_trait]
impl SnapshotSource for InMemorySnapshotSource {
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<Option<Value>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::unavailable("snapshot source lock poisoned"))?;
        Ok(rows.get(&(entity_type.to_string(), entity_id.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn restrict_drops_unlisted_fields() {
        let policy = SnapshotPolicy::brokerage();
        let row = json!({
            "id": "u-1",
            "email": "a@example.com",
            "password_hash": "$argon2id$...",
            "status": "active"
        });

        let restricted = policy.restrict("user", row).unwrap();
        assert_eq!(restricted, json!({"id": "u-1", "email": "a@example.com", "status": "active"}));
    }

    #[test]
    fn unlisted_entity_types_are_not_snapshotted() {
        let policy = SnapshotPolicy::brokerage();
        assert!(!policy.covers("session"));
        assert_eq!(policy.restrict("session", json!({"id": 1})), None);
        assert_eq!(policy.restrict("user", json!("not an object")), None);
    }

    #[test]
    fn scrub_masks_nested_secrets() {
        let policy = SnapshotPolicy::brokerage();
        let body = json!({
            "email": "a@example.com",
            "Password": "hunter2",
            "profile": {"new_password": "x", "name": "A"},
            "tokens": [{"token": "t"}]
        });

        let scrubbed = policy.scrub_request(body);
        assert_eq!(scrubbed["email"], "a@example.com");
        assert_eq!(scrubbed["Password"], SnapshotPolicy::REDACTED);
        assert_eq!(scrubbed["profile"]["new_password"], SnapshotPolicy::REDACTED);
        assert_eq!(scrubbed["profile"]["name"], "A");
        assert_eq!(scrubbed["tokens"][0]["token"], SnapshotPolicy::REDACTED);
    }
}

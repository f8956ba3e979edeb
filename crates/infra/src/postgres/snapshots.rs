use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use brokerage_audit::SnapshotSource;
use brokerage_core::StoreError;

use super::map_sqlx_error;

/// Reads the current row of an audited entity as JSON.
///
/// Table names come from a fixed entity-type map, never from the request.
/// The returned row is unfiltered; `SnapshotPolicy` restricts it.
#[derive(Debug, Clone)]
pub struct PgSnapshotSource {
    pool: PgPool,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn table_for(entity_type: &str) -> Option<&'static str> {
        match entity_type {
            "user" => Some("users"),
            "property" => Some("properties"),
            "customer" => Some("customers"),
            "booking" => Some("bookings"),
            "permission_template" => Some("permission_templates"),
            _ => None,
        }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshotSource {
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<Option<JsonValue>, StoreError> {
        let Some(table) = Self::table_for(entity_type) else {
            return Ok(None);
        };

        let sql = format!("SELECT to_jsonb(t) AS state FROM {table} t WHERE t.id::text = $1");
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_snapshot", e))?;

        row.map(|row| row.try_get::<JsonValue, _>("state"))
            .transpose()
            .map_err(|e| map_sqlx_error("decode_snapshot", e))
    }
}

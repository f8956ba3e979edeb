use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use brokerage_audit::{AuditAction, AuditLogEntry, AuditLogReader, AuditMetadata, AuditPage, AuditQuery, AuditSink};
use brokerage_core::{AuditEntryId, StoreError, UserId};

use super::map_sqlx_error;

/// `audit_logs` table. The table rejects UPDATE and DELETE.
#[derive(Debug, Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditLog {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, actor_id, entity_type, entity_id, action, before_state, after_state, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*entry.id.as_uuid())
        .bind(entry.actor_id.map(Uuid::from))
        .bind(&entry.entity_type)
        .bind(entry.entity_id.as_deref())
        .bind(entry.action.as_str())
        .bind(entry.before_state.clone())
        .bind(entry.after_state.clone())
        .bind(Json(&entry.metadata))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &'a AuditQuery) {
    builder.push(" WHERE TRUE");
    if let Some(actor_id) = query.actor_id {
        builder.push(" AND actor_id = ").push_bind(Uuid::from(actor_id));
    }
    if let Some(entity_type) = &query.entity_type {
        builder.push(" AND entity_type = ").push_bind(entity_type.as_str());
    }
    if let Some(entity_id) = &query.entity_id {
        builder.push(" AND entity_id = ").push_bind(entity_id.as_str());
    }
    if let Some(action) = &query.action {
        builder.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(after) = query.created_after {
        builder.push(" AND created_at > ").push_bind(after);
    }
    if let Some(before) = query.created_before {
        builder.push(" AND created_at < ").push_bind(before);
    }
}

#[async_trait]
impl AuditLogReader for PgAuditLog {
    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM audit_logs");
        push_filters(&mut count, query);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_audit", e))?;

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT id, actor_id, entity_type, entity_id, action, before_state, after_state, metadata, created_at \
             FROM audit_logs",
        );
        push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_audit", e))?;
        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;

        let total = u64::try_from(total).unwrap_or(0);
        let has_more = u64::from(query.offset) + (entries.len() as u64) < total;
        Ok(AuditPage {
            entries,
            total,
            has_more,
        })
    }
}

fn entry_from_row(row: &PgRow) -> Result<AuditLogEntry, StoreError> {
    let decode = |e| map_sqlx_error("decode_audit", e);
    let Json(metadata): Json<AuditMetadata> = row.try_get("metadata").map_err(decode)?;
    let action: String = row.try_get("action").map_err(decode)?;

    Ok(AuditLogEntry {
        id: AuditEntryId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        actor_id: row
            .try_get::<Option<Uuid>, _>("actor_id")
            .map_err(decode)?
            .map(UserId::from_uuid),
        entity_type: row.try_get("entity_type").map_err(decode)?,
        entity_id: row.try_get("entity_id").map_err(decode)?,
        action: AuditAction::new(action),
        before_state: row.try_get::<Option<JsonValue>, _>("before_state").map_err(decode)?,
        after_state: row.try_get::<Option<JsonValue>, _>("after_state").map_err(decode)?,
        metadata,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

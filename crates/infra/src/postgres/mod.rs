//! Postgres adapters for the auth and audit store traits.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError | Scenario |
//! |------------|------------|----------|
//! | `PoolTimedOut`, `PoolClosed`, `Io`, `Tls` | `Unavailable` | Database unreachable |
//! | `Database` | `Unavailable` | Statement rejected (constraint, missing table, ...) |
//! | `ColumnDecode`, `Decode`, `ColumnNotFound` | `Corrupt` | Row does not match the expected shape |
//! | Other | `Unavailable` | Anything else |

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use brokerage_core::StoreError;

mod accounts;
mod audit;
mod grants;
mod snapshots;

pub use accounts::PgAccountDirectory;
pub use audit::PgAuditLog;
pub use grants::{PgGrantStore, PgTemplateStore};
pub use snapshots::PgSnapshotSource;

/// Schema for grants, templates, accounts and the audit log.
pub const MIGRATION_0001: &str = include_str!("../../migrations/0001_authorization.sql");

/// Open a connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the bundled schema. Statements are idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(MIGRATION_0001)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    info!("authorization schema applied");
    Ok(())
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            StoreError::unavailable(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::corrupt(format!("unreadable row in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => StoreError::unavailable(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => StoreError::unavailable(format!("connection pool timed out in {operation}")),
        _ => StoreError::unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

/// Decode a stored permission/role text column that must be non-empty.
pub(crate) fn non_empty(column: &str, value: String) -> Result<String, StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::corrupt(format!("empty {column}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_corrupt() {
        let err = map_sqlx_error("load", sqlx::Error::ColumnNotFound("permission".to_string()));
        assert!(matches!(err, StoreError::Corrupt(_)));

        let err = map_sqlx_error("load", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn migration_declares_the_grant_uniqueness_constraint() {
        assert!(MIGRATION_0001.contains("UNIQUE (user_id, permission)"));
        assert!(MIGRATION_0001.contains("audit_logs_append_only"));
    }

    #[test]
    fn deleting_a_user_never_removes_grant_history() {
        let table = MIGRATION_0001
            .split("CREATE TABLE")
            .find(|t| t.contains("user_permissions ("))
            .unwrap_or_default();
        assert!(table.contains("REFERENCES users (id) ON DELETE RESTRICT"));
        assert!(!MIGRATION_0001.contains("CASCADE"));
    }
}

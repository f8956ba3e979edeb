use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use brokerage_auth::{AccountDirectory, AccountRecord, AccountStatus, Role};
use brokerage_core::{StoreError, UserId};

use super::{map_sqlx_error, non_empty};

/// Session-relevant columns of `users`. Never reads `password_hash`.
#[derive(Debug, Clone)]
pub struct PgAccountDirectory {
    pool: PgPool,
}

impl PgAccountDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> Result<AccountStatus, StoreError> {
    match raw {
        "active" => Ok(AccountStatus::Active),
        "inactive" => Ok(AccountStatus::Inactive),
        "suspended" => Ok(AccountStatus::Suspended),
        other => Err(StoreError::corrupt(format!("unknown account status '{other}'"))),
    }
}

#[async_trait]
impl AccountDirectory for PgAccountDirectory {
    async fn find(&self, user_id: UserId) -> Result<Option<AccountRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, role, branch_code, status, last_password_change, force_password_change
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_account", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e| map_sqlx_error("decode_account", e);
        let status: String = row.try_get("status").map_err(decode)?;
        let role: String = row.try_get("role").map_err(decode)?;

        Ok(Some(AccountRecord {
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
            email: row.try_get("email").map_err(decode)?,
            role: Role::new(non_empty("role", role)?),
            branch_code: row.try_get("branch_code").map_err(decode)?,
            status: parse_status(&status)?,
            last_password_change: row.try_get("last_password_change").map_err(decode)?,
            force_password_change: row.try_get("force_password_change").map_err(decode)?,
        }))
    }
}

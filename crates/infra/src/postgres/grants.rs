use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use brokerage_auth::{
    GrantAction, GrantOutcome, GrantStore, NewGrant, Permission, PermissionGrant, PermissionTemplate, TemplateStore,
};
use brokerage_core::{GrantId, StoreError, TemplateId, UserId};

use super::{map_sqlx_error, non_empty};

const GRANT_COLUMNS: &str = "id, user_id, permission, restrictions, granted_by, granted_at, expires_at, \
                             is_active, revoked_by, revoked_at";

/// Grants in `user_permissions`. Uniqueness of `(user_id, permission)` is
/// enforced by the table; `upsert` is a single `INSERT .. ON CONFLICT` statement.
#[derive(Debug, Clone)]
pub struct PgGrantStore {
    pool: PgPool,
}

impl PgGrantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GrantStore for PgGrantStore {
    #[instrument(skip_all, fields(user_id = %grant.user_id, permission = %grant.permission), err)]
    async fn upsert(&self, grant: NewGrant) -> Result<GrantOutcome, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO user_permissions
                (id, user_id, permission, restrictions, granted_by, granted_at, expires_at,
                 is_active, revoked_by, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NULL, NULL)
            ON CONFLICT (user_id, permission) DO UPDATE SET
                restrictions = EXCLUDED.restrictions,
                granted_by   = EXCLUDED.granted_by,
                granted_at   = EXCLUDED.granted_at,
                expires_at   = EXCLUDED.expires_at,
                is_active    = TRUE,
                revoked_by   = NULL,
                revoked_at   = NULL
            RETURNING {GRANT_COLUMNS}, (xmax = 0) AS inserted
            "#
        );

        let row = sqlx::query(&sql)
            .bind(*GrantId::new().as_uuid())
            .bind(grant.user_id.as_uuid())
            .bind(grant.permission.as_str())
            .bind(grant.restrictions.clone())
            .bind(grant.granted_by.as_uuid())
            .bind(grant.granted_at)
            .bind(grant.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert_grant", e))?;

        let inserted: bool = row.try_get("inserted").map_err(|e| map_sqlx_error("upsert_grant", e))?;
        Ok(GrantOutcome {
            action: if inserted {
                GrantAction::Created
            } else {
                GrantAction::Updated
            },
            grant: grant_from_row(&row)?,
        })
    }

    #[instrument(skip_all, fields(%user_id, %permission), err)]
    async fn deactivate(
        &self,
        user_id: UserId,
        permission: &Permission,
        revoked_by: UserId,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE user_permissions
            SET is_active = FALSE, revoked_by = $3, revoked_at = $4
            WHERE user_id = $1 AND permission = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(permission.as_str())
        .bind(revoked_by.as_uuid())
        .bind(revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_grant", e))?;

        Ok(result.rows_affected())
    }

    async fn effective_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let sql = format!(
            r#"
            SELECT {GRANT_COLUMNS}
            FROM user_permissions
            WHERE user_id = $1
              AND is_active
              AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY granted_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("effective_grants", e))?;

        readable_grants(user_id, rows.iter().map(grant_from_row))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PermissionGrant>, StoreError> {
        let sql = format!("SELECT {GRANT_COLUMNS} FROM user_permissions WHERE user_id = $1 ORDER BY granted_at ASC");
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_grants", e))?;

        readable_grants(user_id, rows.iter().map(grant_from_row))
    }
}

/// Keep every decodable grant. A corrupt row is logged and skipped so one bad
/// permission string does not hide the user's other grants.
fn readable_grants<I>(user_id: UserId, decoded: I) -> Result<Vec<PermissionGrant>, StoreError>
where
    I: IntoIterator<Item = Result<PermissionGrant, StoreError>>,
{
    let mut grants = Vec::new();
    for grant in decoded {
        match grant {
            Ok(grant) => grants.push(grant),
            Err(StoreError::Corrupt(reason)) => {
                warn!(%user_id, %reason, "skipping unreadable permission grant");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(grants)
}

fn grant_from_row(row: &PgRow) -> Result<PermissionGrant, StoreError> {
    let decode = |e| map_sqlx_error("decode_grant", e);

    let permission: String = row.try_get("permission").map_err(decode)?;
    let permission = Permission::parse(non_empty("permission", permission)?)
        .map_err(|e| StoreError::corrupt(format!("stored permission is malformed: {e}")))?;

    Ok(PermissionGrant {
        id: GrantId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(decode)?),
        permission,
        restrictions: row.try_get::<Option<JsonValue>, _>("restrictions").map_err(decode)?,
        granted_by: UserId::from_uuid(row.try_get::<Uuid, _>("granted_by").map_err(decode)?),
        granted_at: row.try_get("granted_at").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        is_active: row.try_get("is_active").map_err(decode)?,
        revoked_by: row
            .try_get::<Option<Uuid>, _>("revoked_by")
            .map_err(decode)?
            .map(UserId::from_uuid),
        revoked_at: row.try_get("revoked_at").map_err(decode)?,
    })
}

/// Templates in `permission_templates`; the permission list is a JSON array.
#[derive(Debug, Clone)]
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get(&self, id: TemplateId) -> Result<Option<PermissionTemplate>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, permissions, is_active FROM permission_templates WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_template", e))?;

        row.as_ref().map(template_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<PermissionTemplate>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, description, permissions, is_active FROM permission_templates ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_templates", e))?;

        rows.iter().map(template_from_row).collect()
    }

    async fn save(&self, template: PermissionTemplate) -> Result<(), StoreError> {
        let permissions: Vec<&str> = template.permissions.iter().map(Permission::as_str).collect();
        sqlx::query(
            r#"
            INSERT INTO permission_templates (id, name, description, permissions, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                permissions = EXCLUDED.permissions,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(template.id.as_uuid())
        .bind(&template.name)
        .bind(template.description.as_deref())
        .bind(Json(permissions))
        .bind(template.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_template", e))?;
        Ok(())
    }
}

fn template_from_row(row: &PgRow) -> Result<PermissionTemplate, StoreError> {
    let decode = |e| map_sqlx_error("decode_template", e);
    let Json(names): Json<Vec<String>> = row.try_get("permissions").map_err(decode)?;

    Ok(PermissionTemplate {
        id: TemplateId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        // Entries are validated when the template is applied.
        permissions: names.into_iter().map(Permission::new).collect(),
        is_active: row.try_get("is_active").map_err(decode)?,
    })
}

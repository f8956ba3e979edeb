use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::{Value, json};

use brokerage_audit::{AuditAction, AuditRequest, HandlerResponse};
use brokerage_auth::{
    AccountRecord, Actor, GrantAction, GrantOptions, Permission, PermissionContext, SessionError,
};
use brokerage_core::UserId;

use crate::app::dto::{self, ExplainRequest, GrantPermissionRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::authz::{guarded, require_permission};
use crate::context::RequestMeta;

/// Entity type recorded for grant changes; the entity id is the target user.
const GRANT_ENTITY: &str = "user_permission";

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route(
            "/users/:id/permissions",
            guarded(get(list_user_permissions), require_permission(["permissions:read"])),
        )
        .route(
            "/users/:id/permissions",
            guarded(post(grant_permission), require_permission(["permissions:grant"])),
        )
        .route(
            "/users/:id/permissions/explain",
            guarded(post(explain_permission), require_permission(["permissions:read"])),
        )
        .route(
            "/users/:id/permissions/:permission",
            guarded(delete(revoke_permission), require_permission(["permissions:revoke"])),
        )
        .route(
            "/users/:id/permission-templates/:template_id",
            guarded(post(apply_template), require_permission(["permissions:grant"])),
        )
        .route(
            "/permission-templates",
            guarded(get(list_templates), require_permission(["permissions:read"])),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn my_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
) -> Response {
    let effective = services.resolver.user_permissions(actor.id, &actor.role).await;
    (StatusCode::OK, Json(effective)).into_response()
}

pub async fn list_user_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let account = match target_account(&services, &id).await {
        Ok(account) => account,
        Err(response) => return response,
    };

    let effective = services
        .resolver
        .user_permissions(account.user_id, &account.role)
        .await;
    let grants = match services.grants.list_grants(account.user_id).await {
        Ok(grants) => grants,
        Err(e) => return errors::into_response(errors::grant_error(&e)),
    };

    (
        StatusCode::OK,
        Json(json!({
            "user_id": account.user_id,
            "role": account.role,
            "effective": effective,
            "grants": grants,
        })),
    )
        .into_response()
}

pub async fn grant_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request = audit_request(&actor, &meta, &id, dto::audit_body(&body));
    let svc = services.clone();
    let response = services
        .audit
        .audit_critical_action(AuditAction::GRANT_PERMISSION, GRANT_ENTITY, request, move || async move {
            let user_id = match dto::parse_user_id(&id) {
                Ok(id) => id,
                Err(response) => return response,
            };
            let req: GrantPermissionRequest = match dto::parse_body(&body) {
                Ok(req) => req,
                Err(response) => return response,
            };
            if let Err(response) = ensure_account(&svc, user_id).await {
                return response;
            }

            let options = GrantOptions {
                restrictions: req.restrictions,
                expires_at: req.expires_at,
            };
            match svc.grants.grant_permission(user_id, &req.permission, actor.id, options).await {
                Ok(outcome) => {
                    let status = match outcome.action {
                        GrantAction::Created => StatusCode::CREATED,
                        GrantAction::Updated => StatusCode::OK,
                    };
                    HandlerResponse::new(status.as_u16(), json!(outcome))
                }
                Err(e) => errors::grant_error(&e),
            }
        })
        .await;

    errors::into_response(response)
}

pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Extension(meta): Extension<RequestMeta>,
    Path((id, permission)): Path<(String, String)>,
) -> Response {
    let request = audit_request(&actor, &meta, &id, Some(json!({ "permission": permission })));
    let svc = services.clone();
    let response = services
        .audit
        .audit_critical_action(AuditAction::REVOKE_PERMISSION, GRANT_ENTITY, request, move || async move {
            let user_id = match dto::parse_user_id(&id) {
                Ok(id) => id,
                Err(response) => return response,
            };
            match svc.grants.revoke_permission(user_id, &permission, actor.id).await {
                Ok(()) => HandlerResponse::new(
                    StatusCode::OK.as_u16(),
                    json!({ "user_id": user_id, "permission": permission, "revoked": true }),
                ),
                Err(e) => errors::grant_error(&e),
            }
        })
        .await;

    errors::into_response(response)
}

pub async fn apply_template(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Extension(meta): Extension<RequestMeta>,
    Path((id, template_id)): Path<(String, String)>,
) -> Response {
    let request = audit_request(&actor, &meta, &id, Some(json!({ "template_id": template_id })));
    let svc = services.clone();
    let response = services
        .audit
        .audit_critical_action(AuditAction::APPLY_TEMPLATE, GRANT_ENTITY, request, move || async move {
            let user_id = match dto::parse_user_id(&id) {
                Ok(id) => id,
                Err(response) => return response,
            };
            let template_id = match dto::parse_template_id(&template_id) {
                Ok(id) => id,
                Err(response) => return response,
            };
            if let Err(response) = ensure_account(&svc, user_id).await {
                return response;
            }
            match svc.grants.apply_permission_template(user_id, template_id, actor.id).await {
                Ok(application) => HandlerResponse::new(StatusCode::OK.as_u16(), json!(application)),
                Err(e) => errors::grant_error(&e),
            }
        })
        .await;

    errors::into_response(response)
}

/// Dry-run a permission check for another user and report which rule decided it.
pub async fn explain_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let account = match target_account(&services, &id).await {
        Ok(account) => account,
        Err(response) => return response,
    };
    let req: ExplainRequest = match dto::parse_body(&body) {
        Ok(req) => req,
        Err(response) => return errors::into_response(response),
    };
    let permission = match Permission::parse(req.permission) {
        Ok(permission) => permission,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    let context = PermissionContext {
        owner_id: req.owner_id,
        branch_code: req.branch_code.or(account.branch_code),
    };
    let effective = services
        .resolver
        .user_permissions(account.user_id, &account.role)
        .await;
    let explanation = services.resolver.explain(&effective, &permission, &context);

    (StatusCode::OK, Json(explanation)).into_response()
}

pub async fn list_templates(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.grants.list_templates().await {
        Ok(templates) => (StatusCode::OK, Json(json!({ "templates": templates }))).into_response(),
        Err(e) => errors::into_response(errors::grant_error(&e)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `target` is the raw path id, so malformed ids are recorded as sent.
fn audit_request(actor: &Actor, meta: &RequestMeta, target: &str, body: Option<Value>) -> AuditRequest {
    AuditRequest {
        actor_id: Some(actor.id),
        entity_id: Some(target.to_string()),
        body,
        ip: Some(meta.ip().to_string()),
        user_agent: meta.user_agent().map(str::to_string),
    }
}

async fn target_account(services: &AppServices, raw_id: &str) -> Result<AccountRecord, Response> {
    let user_id = dto::parse_user_id(raw_id).map_err(errors::into_response)?;
    match services.session.account(user_id).await {
        Ok(Some(account)) => Ok(account),
        Ok(None) => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no user {user_id}"),
        )),
        Err(e) => Err(errors::session_error_to_response(e)),
    }
}

/// Grants may only target existing users.
async fn ensure_account(services: &AppServices, user_id: UserId) -> Result<(), HandlerResponse> {
    match services.session.account(user_id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(errors::handler_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no user {user_id}"),
        )),
        Err(SessionError::Store(e)) => Err(errors::store_error(&e)),
        Err(e) => Err(errors::handler_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            e.to_string(),
        )),
    }
}

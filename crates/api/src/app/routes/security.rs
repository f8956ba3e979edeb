use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::Response,
    routing::post,
};
use serde_json::{Value, json};

use brokerage_audit::{AuditAction, AuditRecorder, AuditRequest, HandlerResponse};
use brokerage_auth::{Actor, AttemptKey};

use crate::app::dto::{self, UnlockRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::authz::{guarded, require_permission};
use crate::context::RequestMeta;

pub fn router() -> Router {
    Router::new().route(
        "/security/unlock",
        guarded(post(unlock), require_permission(["security:unlock"])),
    )
}

/// Clear the failed-attempt counter for `(ip, user_id | anonymous)`.
pub async fn unlock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Extension(meta): Extension<RequestMeta>,
    body: Bytes,
) -> Response {
    // Read up front as well so the audit entry can name the unlocked user.
    let recorded = dto::audit_body(&body);
    let target = recorded
        .as_ref()
        .and_then(|value| value.get("user_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let request = AuditRequest {
        actor_id: Some(actor.id),
        entity_id: target,
        body: recorded,
        ip: Some(meta.ip().to_string()),
        user_agent: meta.user_agent().map(str::to_string),
    };

    let svc = services.clone();
    let response = services
        .audit
        .audit_critical_action(AuditAction::UNLOCK, AuditRecorder::USER_ENTITY, request, move || async move {
            let req: UnlockRequest = match dto::parse_body(&body) {
                Ok(req) => req,
                Err(response) => return response,
            };
            if req.ip.trim().is_empty() {
                return errors::handler_error(StatusCode::BAD_REQUEST, "validation_error", "ip must not be empty");
            }

            let key = AttemptKey::new(req.ip.trim(), req.user_id);
            match svc.session.clear_attempts(&key).await {
                Ok(()) => HandlerResponse::new(
                    StatusCode::OK.as_u16(),
                    json!({ "unlocked": true, "key": key.to_string() }),
                ),
                Err(e) => {
                    tracing::error!(error = %e, %key, "unlock failed");
                    errors::handler_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal server error")
                }
            }
        })
        .await;

    errors::into_response(response)
}

//! Per-route permission gate.
//!
//! Attach with [`guarded`] so the check runs after authentication and session
//! validation. The request passes if the actor holds any one of the listed
//! permissions, checked in order.

use std::sync::Arc;

use axum::{
    extract::{Extension, Request, State},
    http::StatusCode,
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use serde_json::json;
use tracing::{debug, warn};

use brokerage_auth::{Actor, Permission, PermissionContext};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{ResolvedPermissions, ResourceOwner};

#[derive(Debug, Clone)]
pub struct RequirePermission {
    required: Arc<[Permission]>,
}

impl RequirePermission {
    pub fn required(&self) -> &[Permission] {
        &self.required
    }
}

pub fn require_permission<I, P>(permissions: I) -> RequirePermission
where
    I: IntoIterator<Item = P>,
    P: Into<Permission>,
{
    RequirePermission {
        required: permissions.into_iter().map(Into::into).collect(),
    }
}

/// Wrap a method router with the gate.
pub fn guarded(route: MethodRouter, gate: RequirePermission) -> MethodRouter {
    route.route_layer(from_fn_with_state(gate, enforce))
}

pub async fn enforce(
    State(gate): State<RequirePermission>,
    Extension(services): Extension<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(actor) = req.extensions().get::<Actor>().cloned() else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "not_authenticated", "authentication required");
    };

    let mut context = PermissionContext::for_actor(&actor);
    if let Some(ResourceOwner(owner)) = req.extensions().get::<ResourceOwner>() {
        context = context.with_owner(*owner);
    }

    let effective = services.resolver.user_permissions(actor.id, &actor.role).await;
    match services.resolver.first_allowed(&effective, gate.required(), &context) {
        Some((permission, rule)) => {
            debug!(user_id = %actor.id, %permission, ?rule, "permission granted");
            req.extensions_mut().insert(ResolvedPermissions(Arc::new(effective)));
            next.run(req).await
        }
        None => {
            warn!(
                user_id = %actor.id,
                role = %actor.role,
                path = %req.uri().path(),
                "insufficient permissions"
            );
            (
                StatusCode::FORBIDDEN,
                axum::Json(json!({
                    "error": "insufficient_permissions",
                    "message": "insufficient permissions",
                    "required": gate.required(),
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, middleware::from_fn, routing::get};
    use brokerage_auth::Role;
    use brokerage_core::UserId;
    use brokerage_infra::AppConfig;
    use chrono::Utc;
    use tower::ServiceExt;

    fn agent() -> Actor {
        Actor {
            id: UserId::new(),
            role: Role::AGENT,
            branch_code: Some("NYC".to_string()),
            token_issued_at: Utc::now(),
        }
    }

    async fn permission_count(Extension(resolved): Extension<ResolvedPermissions>) -> String {
        resolved.0.all_permissions.len().to_string()
    }

    /// A customer route gated on `customers:read:own`, with the actor and the
    /// customer's owner injected the way upstream layers would.
    async fn call(actor: Option<Actor>, owner: UserId) -> (StatusCode, serde_json::Value) {
        let (services, _) = AppServices::in_memory(&AppConfig::in_memory("test"));
        let app = Router::new()
            .route(
                "/customers/:id",
                guarded(get(permission_count), require_permission(["customers:read:own"])),
            )
            .layer(from_fn(move |mut req: Request, next: Next| {
                let actor = actor.clone();
                async move {
                    if let Some(actor) = actor {
                        req.extensions_mut().insert(actor);
                    }
                    req.extensions_mut().insert(ResourceOwner(owner));
                    next.run(req).await
                }
            }))
            .layer(Extension(Arc::new(services)));

        let response = app
            .oneshot(axum::http::Request::get("/customers/c-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[test]
    fn requirement_keeps_order() {
        let gate = require_permission([Permission::from_static("audit:read"), Permission::from_static("*")]);
        let names: Vec<&str> = gate.required().iter().map(Permission::as_str).collect();
        assert_eq!(names, ["audit:read", "*"]);
    }

    #[tokio::test]
    async fn owner_reaches_handler_with_resolved_permissions() {
        let actor = agent();
        let owner = actor.id;
        let (status, body) = call(Some(actor), owner).await;

        assert_eq!(status, StatusCode::OK);
        // The handler saw the agent's role permissions.
        assert!(body.as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn other_owner_is_forbidden() {
        let (status, body) = call(Some(agent()), UserId::new()).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "insufficient_permissions");
        assert_eq!(body["required"], serde_json::json!(["customers:read:own"]));
    }

    #[tokio::test]
    async fn missing_actor_is_unauthenticated() {
        let (status, body) = call(None, UserId::new()).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "not_authenticated");
    }
}

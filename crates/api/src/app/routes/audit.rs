use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::app::dto::AuditLogParams;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::authz::{guarded, require_permission};

pub fn router() -> Router {
    Router::new().route(
        "/audit-log",
        guarded(get(audit_log), require_permission(["audit:read"])),
    )
}

/// Newest-first page of the audit trail, plus writer counters.
pub async fn audit_log(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<AuditLogParams>,
) -> Response {
    let query = params.into_query();
    match services.audit_log.query(&query).await {
        Ok(page) => (
            StatusCode::OK,
            Json(json!({
                "entries": page.entries,
                "total": page.total,
                "has_more": page.has_more,
                "limit": query.limit,
                "offset": query.offset,
                "writer": services.audit.stats(),
            })),
        )
            .into_response(),
        Err(e) => errors::into_response(errors::store_error(&e)),
    }
}

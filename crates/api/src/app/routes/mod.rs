use axum::{Router, routing::get};

pub mod audit;
pub mod permissions;
pub mod security;
pub mod system;

/// Router for every authenticated endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/me/permissions", get(permissions::my_permissions))
        .nest("/admin", admin_router())
}

fn admin_router() -> Router {
    Router::new()
        .merge(permissions::router())
        .merge(audit::router())
        .merge(security::router())
}

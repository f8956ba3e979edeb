//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: store selection and the shared `AppServices`
//! - `routes/`: HTTP routes + handlers, one file per area
//! - `dto.rs`: request DTOs and parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use brokerage_infra::AppConfig;

use crate::middleware::{self, AuthState, Hs256Verifier};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router around already constructed services.
pub fn build_app(services: Arc<AppServices>, config: &AppConfig) -> Router {
    let auth_state = AuthState {
        jwt: Arc::new(Hs256Verifier::new(config.jwt_secret.as_bytes())),
        trust_forwarded_for: config.trust_forwarded_for,
    };

    // Session check runs inside the brute-force guard so its 401s are counted.
    let protected = routes::router()
        .layer(axum::middleware::from_fn(middleware::session_guard))
        .layer(axum::middleware::from_fn(middleware::brute_force_guard));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(axum::middleware::from_fn_with_state(auth_state, middleware::authenticate))
        .layer(Extension(services))
}

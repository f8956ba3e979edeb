use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::{Value, json};

use brokerage_audit::HandlerResponse;
use brokerage_auth::{GrantError, SessionError};
use brokerage_core::StoreError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (status, axum::Json(error_body(code, message))).into_response()
}

pub fn error_body(code: &'static str, message: impl Into<String>) -> Value {
    json!({
        "error": code,
        "message": message.into(),
    })
}

/// Error shape for handlers running inside the audit recorder.
pub fn handler_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> HandlerResponse {
    HandlerResponse::new(status.as_u16(), error_body(code, message))
}

pub fn grant_error(err: &GrantError) -> HandlerResponse {
    match err {
        GrantError::Validation(msg) => handler_error(StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
        GrantError::NotFound(msg) => handler_error(StatusCode::NOT_FOUND, "not_found", msg.clone()),
        GrantError::Store(e) => store_error(e),
    }
}

pub fn store_error(err: &StoreError) -> HandlerResponse {
    tracing::error!(error = %err, "store failure");
    handler_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal server error")
}

pub fn session_error_to_response(err: SessionError) -> axum::response::Response {
    match err {
        SessionError::NotAuthenticated => {
            json_error(StatusCode::UNAUTHORIZED, "not_authenticated", "authentication required")
        }
        SessionError::SessionInvalid => json_error(StatusCode::UNAUTHORIZED, "session_invalid", err.to_string()),
        SessionError::PasswordChanged => json_error(StatusCode::UNAUTHORIZED, "password_changed", err.to_string()),
        SessionError::PasswordChangeRequired => {
            json_error(StatusCode::FORBIDDEN, "password_change_required", err.to_string())
        }
        SessionError::BruteForceBlocked { retry_after_minutes } => too_many_attempts(retry_after_minutes),
        SessionError::Store(e) => into_response(store_error(&e)),
    }
}

/// 429 with `Retry-After` in seconds.
pub fn too_many_attempts(retry_after_minutes: i64) -> axum::response::Response {
    let mut response = json_error(
        StatusCode::TOO_MANY_REQUESTS,
        "too_many_attempts",
        format!("too many failed attempts; try again in {retry_after_minutes} minute(s)"),
    );
    let seconds = retry_after_minutes.max(1).saturating_mul(60);
    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

pub fn into_response(response: HandlerResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(response.body)).into_response()
}

//! Request pipeline, outermost first: `authenticate` → `brute_force_guard` →
//! `session_guard`. The permission gate in `authz` runs per route after these.

use std::sync::Arc;

use axum::{
    extract::{Extension, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use thiserror::Error;
use tracing::debug;

use brokerage_auth::{Actor, ActorClaims, AttemptKey, SessionError, TokenValidationError};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequestMeta;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed or unsigned token: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// HS256 bearer-token verifier.
///
/// Signature checking is done by `jsonwebtoken`; the time window is checked by
/// `ActorClaims::into_actor` against the caller's clock.
pub struct Hs256Verifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256Verifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Actor, TokenError> {
        let data = jsonwebtoken::decode::<ActorClaims>(token, &self.key, &self.validation)?;
        Ok(data.claims.into_actor(now)?)
    }
}

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<Hs256Verifier>,
    pub trust_forwarded_for: bool,
}

/// Attach `RequestMeta` and, for a valid bearer token, the `Actor`.
///
/// Never rejects: whether a missing actor is fatal is `session_guard`'s call.
pub async fn authenticate(State(state): State<AuthState>, mut req: Request, next: Next) -> Response {
    let meta = RequestMeta::from_parts(req.headers(), req.extensions(), state.trust_forwarded_for);
    req.extensions_mut().insert(meta);

    if let Some(token) = extract_bearer(req.headers()) {
        match state.jwt.verify(token, Utc::now()) {
            Ok(actor) => {
                req.extensions_mut().insert(actor);
            }
            Err(e) => debug!(error = %e, "bearer token rejected"),
        }
    }

    next.run(req).await
}

/// Reject blocked `(ip, actor)` pairs with 429, count 401s as failed
/// attempts, and clear the counter on success.
pub async fn brute_force_guard(
    Extension(services): Extension<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let actor = req.extensions().get::<Actor>().cloned();
    let ip = req
        .extensions()
        .get::<RequestMeta>()
        .map(|m| m.ip().to_string())
        .unwrap_or_else(|| RequestMeta::UNKNOWN_IP.to_string());

    if let Err(SessionError::BruteForceBlocked { retry_after_minutes }) =
        services.session.check_brute_force(actor.as_ref(), &ip).await
    {
        return errors::too_many_attempts(retry_after_minutes);
    }

    let response = next.run(req).await;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        services.session.record_failed_attempt(actor.as_ref(), &ip).await;
    } else if status.is_success() {
        let key = AttemptKey::new(ip, actor.as_ref().map(|a| a.id));
        if let Err(e) = services.session.clear_attempts(&key).await {
            debug!(error = %e, "could not clear attempt counter");
        }
    }

    response
}

/// Require an actor whose account is still allowed to hold a session.
pub async fn session_guard(
    Extension(services): Extension<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(actor) = req.extensions().get::<Actor>() else {
        return errors::session_error_to_response(SessionError::NotAuthenticated);
    };

    match services.session.validate_session(actor).await {
        Ok(()) => {}
        Err(SessionError::PasswordChangeRequired) if services.password_change_allowed(req.uri().path()) => {}
        Err(e) => return errors::session_error_to_response(e),
    }

    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use brokerage_auth::Role;
    use brokerage_core::UserId;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    fn mint(secret: &[u8], claims: &ActorClaims) -> String {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn claims(now: DateTime<Utc>) -> ActorClaims {
        ActorClaims {
            sub: UserId::new(),
            role: Role::MANAGER,
            branch_code: Some("NYC".to_string()),
            iat: (now - Duration::minutes(1)).timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        }
    }

    #[test]
    fn verifies_signed_tokens() {
        let now = Utc::now();
        let claims = claims(now);
        let verifier = Hs256Verifier::new(b"secret");

        let actor = verifier.verify(&mint(b"secret", &claims), now).unwrap();
        assert_eq!(actor.id, claims.sub);
        assert_eq!(actor.role, Role::MANAGER);
        assert_eq!(actor.branch_code.as_deref(), Some("NYC"));
    }

    #[test]
    fn rejects_wrong_key_and_expired_tokens() {
        let now = Utc::now();
        let verifier = Hs256Verifier::new(b"secret");

        let forged = mint(b"other", &claims(now));
        assert!(matches!(verifier.verify(&forged, now), Err(TokenError::Decode(_))));

        let token = mint(b"secret", &claims(now));
        assert!(matches!(
            verifier.verify(&token, now + Duration::hours(2)),
            Err(TokenError::Claims(TokenValidationError::Expired))
        ));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer(&headers), Some("abc.def"));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use brokerage_core::UserId;

use crate::{Actor, Role};

/// Token claims the HTTP edge expects once a bearer token has been verified.
///
/// Issuing tokens happens upstream; this crate only turns verified claims into an [`Actor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_code: Option<String>,

    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,

    /// Expiration, seconds since the Unix epoch.
    pub exp: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token timestamp out of range")]
    InvalidTimestamp,
}

impl ActorClaims {
    pub fn issued_at(&self) -> Result<DateTime<Utc>, TokenValidationError> {
        DateTime::from_timestamp(self.iat, 0).ok_or(TokenValidationError::InvalidTimestamp)
    }

    pub fn expires_at(&self) -> Result<DateTime<Utc>, TokenValidationError> {
        DateTime::from_timestamp(self.exp, 0).ok_or(TokenValidationError::InvalidTimestamp)
    }

    /// Validate the time window and build the request actor.
    pub fn into_actor(self, now: DateTime<Utc>) -> Result<Actor, TokenValidationError> {
        validate_claims(&self, now)?;
        let token_issued_at = self.issued_at()?;
        Ok(Actor {
            id: self.sub,
            role: self.role,
            branch_code: self.branch_code,
            token_issued_at,
        })
    }
}

/// Deterministically validate the claims' time window.
///
/// Signature verification / decoding is outside this crate.
pub fn validate_claims(claims: &ActorClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let issued_at = claims.issued_at()?;
    let expires_at = claims.expires_at()?;

    if expires_at <= issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

//! Session validity and brute-force policy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use brokerage_core::{StoreError, UserId};

use crate::attempts::{AttemptCounter, AttemptKey, AttemptWindow, BruteForcePolicy, minutes_remaining};
use crate::{Actor, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl core::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AccountStatus::Active => f.write_str("active"),
            AccountStatus::Inactive => f.write_str("inactive"),
            AccountStatus::Suspended => f.write_str("suspended"),
        }
    }
}

/// Account state consulted on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
    pub branch_code: Option<String>,
    pub status: AccountStatus,
    pub last_password_change: Option<DateTime<Utc>>,
    /// Set by an administrator; blocks everything except changing the password.
    pub force_password_change: bool,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find(&self, user_id: UserId) -> Result<Option<AccountRecord>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<UserId, AccountRecord>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn upsert(&self, record: AccountRecord) {
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.insert(record.user_id, record);
        }
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find(&self, user_id: UserId) -> Result<Option<AccountRecord>, StoreError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| StoreError::unavailable("account directory lock poisoned"))?;
        Ok(accounts.get(&user_id).cloned())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("authentication required")]
    NotAuthenticated,

    #[error("session is no longer valid")]
    SessionInvalid,

    #[error("password was changed after this session started")]
    PasswordChanged,

    #[error("password change required")]
    PasswordChangeRequired,

    #[error("too many failed attempts; try again in {retry_after_minutes} minute(s)")]
    BruteForceBlocked { retry_after_minutes: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Check an account against the actor presenting a token for it.
///
/// Order: missing/non-active account, then a password change after the token
/// was issued, then a pending forced password change.
pub fn validate_account(actor: &Actor, account: Option<&AccountRecord>) -> Result<(), SessionError> {
    let Some(account) = account else {
        return Err(SessionError::SessionInvalid);
    };
    if account.status != AccountStatus::Active {
        return Err(SessionError::SessionInvalid);
    }
    if account
        .last_password_change
        .is_some_and(|changed_at| changed_at > actor.token_issued_at)
    {
        return Err(SessionError::PasswordChanged);
    }
    if account.force_password_change {
        return Err(SessionError::PasswordChangeRequired);
    }
    Ok(())
}

/// Per-request session checks.
#[derive(Clone)]
pub struct SessionGuard {
    accounts: Arc<dyn AccountDirectory>,
    attempts: Arc<dyn AttemptCounter>,
    policy: BruteForcePolicy,
}

impl SessionGuard {
    pub fn new(accounts: Arc<dyn AccountDirectory>, attempts: Arc<dyn AttemptCounter>, policy: BruteForcePolicy) -> Self {
        Self {
            accounts,
            attempts,
            policy,
        }
    }

    pub fn policy(&self) -> &BruteForcePolicy {
        &self.policy
    }

    pub async fn validate_session(&self, actor: &Actor) -> Result<(), SessionError> {
        let account = self.accounts.find(actor.id).await?;
        let result = validate_account(actor, account.as_ref());
        if let Err(e) = &result {
            debug!(user_id = %actor.id, error = %e, "session rejected");
        }
        result
    }

    /// Reject the request if `(ip, actor)` is currently blocked.
    ///
    /// An unreachable counter store lets the request through.
    pub async fn check_brute_force(&self, actor: Option<&Actor>, ip: &str) -> Result<(), SessionError> {
        let key = AttemptKey::new(ip, actor.map(|a| a.id));
        let now = Utc::now();
        let window = match self.attempts.current(&key, now, self.policy.window).await {
            Ok(window) => window,
            Err(e) => {
                warn!(%key, error = %e, "attempt counter unavailable; not enforcing");
                return Ok(());
            }
        };

        match window.and_then(|w| w.blocked_for(now, &self.policy)) {
            Some(remaining) => {
                let retry_after_minutes = minutes_remaining(remaining);
                warn!(%key, retry_after_minutes, "blocked by brute-force protection");
                Err(SessionError::BruteForceBlocked { retry_after_minutes })
            }
            None => Ok(()),
        }
    }

    pub async fn record_failed_attempt(&self, actor: Option<&Actor>, ip: &str) -> Option<AttemptWindow> {
        let key = AttemptKey::new(ip, actor.map(|a| a.id));
        match self.attempts.record_failure(&key, Utc::now(), self.policy.window).await {
            Ok(window) => Some(window),
            Err(e) => {
                warn!(%key, error = %e, "failed to record attempt");
                None
            }
        }
    }

    pub async fn clear_attempts(&self, key: &AttemptKey) -> Result<(), SessionError> {
        Ok(self.attempts.clear(key).await?)
    }

    /// Look up the account behind a user id (used to resolve another user's role).
    pub async fn account(&self, user_id: UserId) -> Result<Option<AccountRecord>, SessionError> {
        Ok(self.accounts.find(user_id).await?)
    }
}

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Audited action name, stored upper-case (e.g. `DELETE`, `GRANT_PERMISSION`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditAction(Cow<'static, str>);

impl AuditAction {
    pub const CRITICAL_PREFIX: &'static str = "CRITICAL_";

    pub const UPDATE: AuditAction = AuditAction::from_static("UPDATE");
    pub const DELETE: AuditAction = AuditAction::from_static("DELETE");
    pub const GRANT_PERMISSION: AuditAction = AuditAction::from_static("GRANT_PERMISSION");
    pub const REVOKE_PERMISSION: AuditAction = AuditAction::from_static("REVOKE_PERMISSION");
    pub const APPLY_TEMPLATE: AuditAction = AuditAction::from_static("APPLY_TEMPLATE");
    pub const UNLOCK: AuditAction = AuditAction::from_static("UNLOCK");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_critical(&self) -> bool {
        self.0.starts_with(Self::CRITICAL_PREFIX)
    }

    /// `CRITICAL_`-prefixed form. Already-critical actions are returned as is.
    pub fn critical(&self) -> Self {
        if self.is_critical() {
            self.clone()
        } else {
            Self::new(format!("{}{}", Self::CRITICAL_PREFIX, self.0))
        }
    }

    /// Actions that change an entity which already exists, and so get a
    /// before-state snapshot.
    pub fn is_mutation_of_existing(&self) -> bool {
        let name = self.0.to_ascii_lowercase();
        ["update", "delete", "reset", "unlock"]
            .iter()
            .any(|verb| name.contains(verb))
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for AuditAction {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl From<String> for AuditAction {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_detection() {
        assert!(AuditAction::DELETE.is_mutation_of_existing());
        assert!(AuditAction::from_static("PASSWORD_RESET").is_mutation_of_existing());
        assert!(AuditAction::UNLOCK.critical().is_mutation_of_existing());
        assert!(!AuditAction::from_static("CREATE").is_mutation_of_existing());
        assert!(!AuditAction::GRANT_PERMISSION.is_mutation_of_existing());
    }

    #[test]
    fn critical_prefix_applied_once() {
        let critical = AuditAction::UNLOCK.critical();
        assert_eq!(critical.as_str(), "CRITICAL_UNLOCK");
        assert_eq!(critical.critical(), critical);
    }
}

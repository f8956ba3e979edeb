use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role name carried by an actor.
///
/// Kept as an opaque string so that tokens minted with a role this build does
/// not know about still deserialize; such roles simply resolve to no
/// permissions in the [`RoleCatalog`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const DIRECTOR: Role = Role(Cow::Borrowed("director"));
    pub const VP: Role = Role(Cow::Borrowed("vp"));
    pub const MANAGER: Role = Role(Cow::Borrowed("manager"));
    pub const AGENT: Role = Role(Cow::Borrowed("agent"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static role → permission templates.
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    roles: HashMap<Role, Vec<Permission>>,
}

impl RoleCatalog {
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role: Role, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.roles.insert(role, permissions.into_iter().collect());
        self
    }

    /// Permissions of `role`; empty for roles the catalog does not define.
    pub fn permissions_for(&self, role: &Role) -> &[Permission] {
        self.roles.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roles(&self) -> impl Iterator<Item = (&Role, &[Permission])> {
        self.roles.iter().map(|(r, p)| (r, p.as_slice()))
    }

    /// The brokerage defaults.
    pub fn brokerage() -> Self {
        use Permission as P;

        Self::empty()
            .with_role(Role::ADMIN, [P::GLOBAL])
            .with_role(
                Role::DIRECTOR,
                [
                    P::from_static("properties:*"),
                    P::from_static("customers:*"),
                    P::from_static("bookings:*"),
                    P::from_static("reports:*"),
                    P::from_static("files:*"),
                    P::from_static("users:read"),
                    P::from_static("users:update"),
                    P::from_static("permissions:read"),
                    P::from_static("audit:read"),
                ],
            )
            .with_role(
                Role::VP,
                [
                    P::from_static("properties:*"),
                    P::from_static("customers:*"),
                    P::from_static("bookings:*"),
                    P::from_static("reports:read"),
                    P::from_static("files:*"),
                    P::from_static("users:read"),
                ],
            )
            .with_role(
                Role::MANAGER,
                [
                    P::from_static("properties:read"),
                    P::from_static("properties:create"),
                    P::from_static("properties:update"),
                    P::from_static("customers:read"),
                    P::from_static("customers:create"),
                    P::from_static("customers:update"),
                    P::from_static("bookings:*"),
                    P::from_static("reports:read"),
                    P::from_static("files:upload"),
                    P::from_static("users:read"),
                ],
            )
            .with_role(
                Role::AGENT,
                [
                    P::from_static("properties:read"),
                    P::from_static("properties:create"),
                    P::from_static("properties:update:own"),
                    P::from_static("properties:delete:own"),
                    P::from_static("customers:create"),
                    P::from_static("customers:read:own"),
                    P::from_static("customers:update:own"),
                    P::from_static("bookings:create"),
                    P::from_static("bookings:read:own"),
                    P::from_static("files:upload"),
                ],
            )
    }
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::brokerage()
    }
}

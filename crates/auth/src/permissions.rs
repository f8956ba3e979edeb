use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEPARATOR: char = ':';
const WILDCARD: &str = "*";
const OWNER_SCOPE: &str = "own";

/// Permission identifier, e.g. `"properties:read"`, `"customers:update:own"`,
/// `"bookings:*"` or the global `"*"`.
///
/// The string form is what gets stored and shown; matching goes through the
/// structured views returned by [`Permission::pattern`] and [`Permission::spec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission must not be empty")]
    Empty,

    #[error("permission '{0}' contains whitespace")]
    Whitespace(String),

    #[error("permission '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("permission '{0}' may only use '*' as its last segment")]
    MisplacedWildcard(String),

    #[error("permission '{0}' must name a resource and an action")]
    MissingAction(String),
}

/// Whether a permission applies to every record or only to the caller's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Any,
    Own,
}

/// `(resource, action, scope)` view of a concrete permission.
///
/// `customers:update:own` is `("customers", "update", Own)`; multi-segment
/// actions keep their inner separators (`reports:export:csv`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSpec<'a> {
    pub resource: &'a str,
    pub action: &'a str,
    pub scope: Scope,
}

/// What a *held* permission authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPattern<'a> {
    /// `*`
    Global,
    /// `resource:*`, `resource:action:*`: anything strictly below the prefix.
    Wildcard { prefix: Vec<&'a str> },
    /// Anything else; matches only itself.
    Exact(PermissionSpec<'a>),
}

impl Permission {
    pub const GLOBAL: Permission = Permission(Cow::Borrowed(WILDCARD));

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Wrap a permission string without validating it.
    ///
    /// Used for requested permissions, which may be arbitrary strings.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Validate a permission string before it is persisted as a grant.
    pub fn parse(name: impl Into<Cow<'static, str>>) -> Result<Self, PermissionError> {
        let name: Cow<'static, str> = name.into();
        let raw = name.as_ref();

        if raw.is_empty() {
            return Err(PermissionError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(PermissionError::Whitespace(raw.to_string()));
        }
        if raw == WILDCARD {
            return Ok(Self(name));
        }

        let segments: Vec<&str> = raw.split(SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PermissionError::EmptySegment(raw.to_string()));
        }
        let last = segments.len() - 1;
        if segments[..last].contains(&WILDCARD) {
            return Err(PermissionError::MisplacedWildcard(raw.to_string()));
        }
        if segments.len() < 2 {
            return Err(PermissionError::MissingAction(raw.to_string()));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_global(&self) -> bool {
        self.as_str() == WILDCARD
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.as_str().split(SEPARATOR)
    }

    /// First segment (`"properties"` for `"properties:read"`).
    pub fn resource(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    /// True when the last segment is `own` and there is an action before it.
    pub fn is_owner_scoped(&self) -> bool {
        self.spec().scope == Scope::Own
    }

    pub fn spec(&self) -> PermissionSpec<'_> {
        let raw = self.as_str();
        let Some((resource, rest)) = raw.split_once(SEPARATOR) else {
            return PermissionSpec {
                resource: raw,
                action: "",
                scope: Scope::Any,
            };
        };

        match rest.rsplit_once(SEPARATOR) {
            Some((action, OWNER_SCOPE)) => PermissionSpec {
                resource,
                action,
                scope: Scope::Own,
            },
            _ => PermissionSpec {
                resource,
                action: rest,
                scope: Scope::Any,
            },
        }
    }

    pub fn pattern(&self) -> PermissionPattern<'_> {
        if self.is_global() {
            return PermissionPattern::Global;
        }
        let segments: Vec<&str> = self.segments().collect();
        match segments.split_last() {
            Some((&WILDCARD, prefix)) if !prefix.is_empty() => PermissionPattern::Wildcard {
                prefix: prefix.to_vec(),
            },
            _ => PermissionPattern::Exact(self.spec()),
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A held wildcard, compiled to its prefix segments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WildcardRule {
    source: Permission,
    prefix: Vec<String>,
}

impl WildcardRule {
    /// `requested` must strictly extend the prefix: `properties:*` covers
    /// `properties:read` and `properties:read:own` but not `properties`.
    fn covers(&self, requested: &Permission) -> bool {
        let mut requested = requested.segments();
        for expected in &self.prefix {
            match requested.next() {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
        requested.next().is_some()
    }
}

/// Held permissions compiled for matching.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    global: bool,
    exact: HashSet<Permission>,
    wildcards: Vec<WildcardRule>,
}

impl PermissionSet {
    pub fn compile<'a>(held: impl IntoIterator<Item = &'a Permission>) -> Self {
        let mut set = Self::default();
        for permission in held {
            match permission.pattern() {
                PermissionPattern::Global => set.global = true,
                PermissionPattern::Wildcard { prefix } => {
                    let prefix = prefix.into_iter().map(str::to_string).collect();
                    set.wildcards.push(WildcardRule {
                        source: permission.clone(),
                        prefix,
                    });
                }
                PermissionPattern::Exact(_) => {}
            }
            set.exact.insert(permission.clone());
        }
        set
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.exact.contains(permission)
    }

    /// The first held wildcard that covers `requested`, if any.
    pub fn wildcard_covering(&self, requested: &Permission) -> Option<&Permission> {
        self.wildcards
            .iter()
            .find(|rule| rule.covers(requested))
            .map(|rule| &rule.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_splits_resource_action_scope() {
        let p = Permission::from_static("customers:update:own");
        assert_eq!(
            p.spec(),
            PermissionSpec {
                resource: "customers",
                action: "update",
                scope: Scope::Own
            }
        );

        let p = Permission::from_static("reports:export:csv");
        assert_eq!(p.spec().action, "export:csv");
        assert_eq!(p.spec().scope, Scope::Any);
    }

    #[test]
    fn two_segment_own_is_an_action_not_a_scope() {
        let p = Permission::from_static("files:own");
        assert!(!p.is_owner_scoped());
        assert_eq!(p.spec().action, "own");
    }

    #[test]
    fn pattern_classifies_global_wildcard_and_exact() {
        assert_eq!(Permission::GLOBAL.pattern(), PermissionPattern::Global);
        assert_eq!(
            Permission::from_static("properties:*").pattern(),
            PermissionPattern::Wildcard {
                prefix: vec!["properties"]
            }
        );
        assert!(matches!(
            Permission::from_static("properties:read").pattern(),
            PermissionPattern::Exact(_)
        ));
    }

    #[test]
    fn parse_rejects_malformed_permissions() {
        assert_eq!(Permission::parse(""), Err(PermissionError::Empty));
        assert!(matches!(
            Permission::parse("properties read"),
            Err(PermissionError::Whitespace(_))
        ));
        assert!(matches!(
            Permission::parse("properties::read"),
            Err(PermissionError::EmptySegment(_))
        ));
        assert!(matches!(
            Permission::parse("*:read"),
            Err(PermissionError::MisplacedWildcard(_))
        ));
        assert!(matches!(
            Permission::parse("properties"),
            Err(PermissionError::MissingAction(_))
        ));
        assert!(Permission::parse("*").is_ok());
        assert!(Permission::parse("properties:*").is_ok());
        assert!(Permission::parse("properties:update:own").is_ok());
    }

    #[test]
    fn wildcard_requires_a_proper_prefix() {
        let set = PermissionSet::compile(&[Permission::from_static("properties:*")]);

        assert!(set.wildcard_covering(&Permission::from_static("properties:read")).is_some());
        assert!(set.wildcard_covering(&Permission::from_static("properties:read:own")).is_some());
        assert!(set.wildcard_covering(&Permission::from_static("properties")).is_none());
        assert!(set.wildcard_covering(&Permission::from_static("propertiesx:read")).is_none());
        assert!(set.wildcard_covering(&Permission::from_static("bookings:read")).is_none());
    }

    #[test]
    fn nested_wildcard_only_covers_its_subtree() {
        let set = PermissionSet::compile(&[Permission::from_static("reports:export:*")]);

        assert!(set.wildcard_covering(&Permission::from_static("reports:export:csv")).is_some());
        assert!(set.wildcard_covering(&Permission::from_static("reports:read")).is_none());
    }
}

//! `brokerage-auth` — permission resolution, grants and session policy.
//!
//! Policy code (`authorize`, `permissions`, `roles`) is pure. Services
//! (`resolver`, `grants`, `session`) talk to storage only through the traits in
//! `store`, `session` and `attempts`; HTTP lives in `brokerage-api`.

pub mod actor;
pub mod attempts;
pub mod authorize;
pub mod claims;
pub mod grants;
pub mod permissions;
pub mod resolver;
pub mod roles;
pub mod session;
pub mod store;

pub use actor::{Actor, PermissionContext};
pub use attempts::{AttemptCounter, AttemptKey, AttemptWindow, BruteForcePolicy, InMemoryAttemptCounter};
pub use authorize::{AuthorizationExplanation, BranchPolicy, Decision, MatchRule, evaluate};
pub use claims::{ActorClaims, TokenValidationError, validate_claims};
pub use grants::{
    GrantAction, GrantError, GrantOptions, GrantOutcome, GrantService, NewGrant, PermissionGrant,
    PermissionTemplate, TemplateApplication, TemplateFailure,
};
pub use permissions::{Permission, PermissionError, PermissionPattern, PermissionSet, PermissionSpec, Scope};
pub use resolver::{EffectivePermissions, PermissionResolver};
pub use roles::{Role, RoleCatalog};
pub use session::{
    AccountDirectory, AccountRecord, AccountStatus, InMemoryAccountDirectory, SessionError, SessionGuard,
    validate_account,
};
pub use store::{GrantStore, InMemoryGrantStore, InMemoryTemplateStore, TemplateStore};

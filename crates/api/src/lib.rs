//! HTTP API: authentication, session and permission middleware, and the
//! admin endpoints for grants, templates, the audit log and unlocks.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;

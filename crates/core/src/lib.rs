//! `brokerage-core` — identifiers and error types shared by every crate.
//!
//! This crate contains no policy and no IO.

pub mod error;
pub mod id;

pub use error::{DomainError, StoreError};
pub use id::{AuditEntryId, GrantId, TemplateId, UserId};

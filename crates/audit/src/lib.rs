//! `brokerage-audit` — append-only audit trail for privileged actions.
//!
//! `AuditRecorder` wraps a handler, snapshots the entity before mutating
//! actions, and hands the finished entry to a bounded background writer.
//! Nothing in this crate fails the wrapped request.

pub mod action;
pub mod entry;
pub mod recorder;
pub mod sink;
pub mod snapshot;
pub mod writer;

pub use action::AuditAction;
pub use entry::{AuditLogEntry, AuditMetadata, Severity};
pub use recorder::{AuditRecorder, AuditRequest, HandlerResponse};
pub use sink::{AuditLogReader, AuditPage, AuditQuery, AuditSink, InMemoryAuditLog};
pub use snapshot::{InMemorySnapshotSource, SnapshotPolicy, SnapshotSource};
pub use writer::{AuditStats, AuditWriter};

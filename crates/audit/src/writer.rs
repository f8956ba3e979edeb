//! Bounded background audit writer.
//!
//! Entries go onto a bounded channel drained by one task. A full channel
//! drops the entry instead of slowing the request; drops and sink failures
//! are counted in `AuditStats`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::{AuditLogEntry, AuditSink};

#[derive(Debug)]
enum Command {
    Write(Box<AuditLogEntry>),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Writer counters since start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub enqueued: u64,
    pub written: u64,
    /// Rejected because the queue was full or the writer had stopped.
    pub dropped: u64,
    /// Accepted but the sink returned an error.
    pub failed: u64,
}

#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<Command>,
    counters: Arc<Counters>,
}

impl AuditWriter {
    /// Start the writer task on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        tokio::spawn(run(sink, rx, counters.clone()));
        Self { tx, counters }
    }

    /// Queue an entry without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, entry: AuditLogEntry) -> bool {
        let action = entry.action.clone();
        match self.tx.try_send(Command::Write(Box::new(entry))) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%action, "audit queue full; entry dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(%action, "audit writer stopped; entry dropped");
                false
            }
        }
    }

    /// Wait until every entry queued before this call has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run(sink: Arc<dyn AuditSink>, mut rx: mpsc::Receiver<Command>, counters: Arc<Counters>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Write(entry) => match sink.append(&entry).await {
                Ok(()) => {
                    counters.written.fetch_add(1, Ordering::Relaxed);
                    debug!(entry_id = %entry.id, action = %entry.action, "audit entry written");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        entry_id = %entry.id,
                        action = %entry.action,
                        entity_type = %entry.entity_type,
                        error = %e,
                        "audit write failed"
                    );
                }
            },
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("audit writer stopped");
}

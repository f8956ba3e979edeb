//! Audit log persistence: append for the writer, query for the admin console.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerage_core::{StoreError, UserId};

use crate::AuditLogEntry;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;
}

/// Filter and page for reading the audit log. Results are newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    pub actor_id: Option<UserId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            actor_id: None,
            entity_type: None,
            entity_id: None,
            action: None,
            created_after: None,
            created_before: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    pub fn page(mut self, limit: Option<u32>, offset: Option<u32>) -> Self {
        self.limit = limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT);
        self.offset = offset.unwrap_or(0);
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.actor_id.is_none_or(|id| entry.actor_id == Some(id))
            && self.entity_type.as_deref().is_none_or(|t| entry.entity_type == t)
            && self
                .entity_id
                .as_deref()
                .is_none_or(|id| entry.entity_id.as_deref() == Some(id))
            && self.action.as_deref().is_none_or(|a| entry.action.as_str() == a)
            && self.created_after.is_none_or(|t| entry.created_at > t)
            && self.created_before.is_none_or(|t| entry.created_at < t)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    /// Matching entries across all pages.
    pub total: u64,
    pub has_more: bool,
}

#[async_trait]
pub trait AuditLogReader: Send + Sync {
    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, StoreError>;
}

/// Process-local audit log. Entries are kept in append order.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, oldest first.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

fn poisoned() -> StoreError {
    StoreError::unavailable("audit log lock poisoned")
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditLogReader for InMemoryAuditLog {
    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let matching: Vec<&AuditLogEntry> = entries.iter().rev().filter(|e| query.matches(e)).collect();
        let total = matching.len() as u64;
        let page: Vec<AuditLogEntry> = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();
        let has_more = u64::from(query.offset) + (page.len() as u64) < total;
        Ok(AuditPage {
            entries: page,
            total,
            has_more,
        })
    }
}

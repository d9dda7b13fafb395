//! Append-only audit log of authorization decisions.
//!
//! # Design Decisions
//! - Entries are never mutated or removed; retention belongs to whoever
//!   consumes the `audit` tracing target
//! - Timestamps are clamped so the log stays monotonically ordered even if
//!   the wall clock steps backwards
//! - Queries return newest first

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;
use uuid::Uuid;

use crate::observability::metrics;

/// One authorization decision.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub action: String,
    pub resource: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub reason: Option<String>,
    pub organization_id: Option<String>,
    pub client_address: String,
    pub user_agent: String,
}

/// Fields supplied by the caller; id and timestamp are assigned on append.
#[derive(Debug, Clone, Default)]
pub struct AuditRecord {
    pub user_id: String,
    pub action: String,
    pub resource: String,
    pub success: bool,
    pub reason: Option<String>,
    pub organization_id: Option<String>,
    pub client_address: String,
    pub user_agent: String,
}

/// A page of audit entries, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub entries: Vec<AuditLogEntry>,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decision and return the stored entry.
    pub fn append(&self, record: AuditRecord) -> AuditLogEntry {
        let mut entries = self.entries.write().expect("audit log lock poisoned");

        let mut timestamp = Utc::now();
        if let Some(last) = entries.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }

        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            user_id: record.user_id,
            action: record.action,
            resource: record.resource,
            timestamp,
            success: record.success,
            reason: record.reason,
            organization_id: record.organization_id,
            client_address: record.client_address,
            user_agent: record.user_agent,
        };
        entries.push(entry.clone());
        drop(entries);

        tracing::info!(
            target: "audit",
            user_id = %entry.user_id,
            action = %entry.action,
            resource = %entry.resource,
            success = entry.success,
            reason = entry.reason.as_deref().unwrap_or(""),
            organization_id = entry.organization_id.as_deref().unwrap_or(""),
            client = %entry.client_address,
            "Access decision"
        );
        metrics::record_audit_entry(entry.success);

        entry
    }

    /// Entries in reverse-chronological order.
    pub fn page(&self, offset: usize, limit: usize) -> AuditPage {
        let entries = self.entries.read().expect("audit log lock poisoned");
        AuditPage {
            total: entries.len(),
            offset,
            limit,
            entries: entries.iter().rev().skip(offset).take(limit).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("audit log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, success: bool) -> AuditRecord {
        AuditRecord {
            user_id: user.to_string(),
            action: "GET".to_string(),
            resource: "/api/claims".to_string(),
            success,
            client_address: "10.0.0.1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_append_and_page_newest_first() {
        let log = AuditLog::new();
        for i in 0..5 {
            log.append(record(&format!("u{}", i), i % 2 == 0));
        }
        assert_eq!(log.len(), 5);

        let page = log.page(0, 3);
        assert_eq!(page.total, 5);
        let users: Vec<_> = page.entries.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(users, vec!["u4", "u3", "u2"]);

        let page = log.page(3, 10);
        let users: Vec<_> = page.entries.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(users, vec!["u1", "u0"]);

        for pair in log.page(0, 5).entries.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let log = AuditLog::new();
        log.append(record("u", true));
        assert!(log.page(5, 10).entries.is_empty());
        assert!(log.page(0, 0).entries.is_empty());
    }
}

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Cancel,
    Approve,
    Reject,
    StatusChange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Booking,
    Approval,
    Vehicle,
}

/// An immutable record of one mutating action, including before/after
/// snapshots of the fields that changed. Entries are only ever appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// None for cascade writes the system performed on its own.
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: String,
    /// Changed fields only, as a JSON object. None when the action created
    /// the entity (no prior state) or carried no field-level diff.
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub description: String,
    pub source_ip: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        entity: AuditEntity,
        entity_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            actor: None,
            action,
            entity,
            entity_id: entity_id.into(),
            old_values: None,
            new_values: None,
            description: description.into(),
            source_ip: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn by(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_values(
        mut self,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    pub fn from_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }
}

/// Best-effort side channel for audit entries. Implementations must never
/// surface persistence failures to the caller: the primary operation's
/// result is unaffected by audit problems, which are reported as telemetry
/// instead.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditSink {
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::user::UserId;

    use super::{AuditAction, AuditEntity, AuditEntry, AuditSink, InMemoryAuditSink};

    #[tokio::test]
    async fn in_memory_sink_keeps_entries_in_order() {
        let sink = InMemoryAuditSink::default();
        sink.record(
            AuditEntry::new(AuditAction::Create, AuditEntity::Booking, "b-1", "booking created")
                .by(UserId("emp-1".to_string()))
                .with_values(None, Some(json!({"status": "pending"}))),
        )
        .await;
        sink.record(
            AuditEntry::new(AuditAction::Approve, AuditEntity::Approval, "a-1", "level 1 approved")
                .by(UserId("l1".to_string())),
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entity_id, "b-1");
        assert_eq!(entries[0].actor, Some(UserId("emp-1".to_string())));
        assert_eq!(entries[1].action, AuditAction::Approve);
        assert!(entries[0].new_values.is_some());
    }
}

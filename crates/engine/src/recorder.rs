//! The audit trail recorder: an [`AuditSink`] over the append-only log
//! table. Persistence failures are captured as telemetry and never surface
//! to the caller — by the time an entry is recorded, the primary state
//! mutation has already committed and must stand regardless.

use std::sync::Arc;

use tracing::warn;

use motorpool_core::audit::{AuditEntry, AuditSink};
use motorpool_db::repositories::AuditLogRepository;

pub struct AuditRecorder {
    log: Arc<dyn AuditLogRepository>,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn AuditLogRepository>) -> Self {
        Self { log }
    }
}

#[async_trait::async_trait]
impl AuditSink for AuditRecorder {
    async fn record(&self, entry: AuditEntry) {
        if let Err(error) = self.log.append(&entry).await {
            warn!(
                entry_id = %entry.id,
                entity_id = %entry.entity_id,
                %error,
                "audit entry dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use motorpool_core::audit::{AuditAction, AuditEntity, AuditEntry, AuditSink};
    use motorpool_db::repositories::{
        AuditFilter, AuditLogRepository, InMemoryAuditLogRepository, Page, RepositoryError,
    };

    use super::AuditRecorder;

    struct BrokenAuditLog;

    #[async_trait::async_trait]
    impl AuditLogRepository for BrokenAuditLog {
        async fn append(&self, _entry: &AuditEntry) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("disk on fire".to_string()))
        }

        async fn query(
            &self,
            _filter: &AuditFilter,
            _page: Page,
        ) -> Result<Vec<AuditEntry>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn entries_reach_the_log() {
        let log = Arc::new(InMemoryAuditLogRepository::default());
        let recorder = AuditRecorder::new(log.clone());
        recorder
            .record(AuditEntry::new(
                AuditAction::Create,
                AuditEntity::Booking,
                "b-1",
                "booking created",
            ))
            .await;
        assert_eq!(log.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn log_failures_never_reach_the_caller() {
        let recorder = AuditRecorder::new(Arc::new(BrokenAuditLog));
        // Signature is infallible; the failure becomes a warn log.
        recorder
            .record(AuditEntry::new(
                AuditAction::Cancel,
                AuditEntity::Booking,
                "b-1",
                "booking cancelled",
            ))
            .await;
    }
}

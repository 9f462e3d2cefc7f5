use sqlx::Row;

use motorpool_core::audit::{AuditAction, AuditEntity, AuditEntry};
use motorpool_core::domain::user::UserId;

use super::{format_ts, parse_ts, AuditFilter, AuditLogRepository, Page, RepositoryError};
use crate::DbPool;

pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn audit_action_as_str(action: AuditAction) -> &'static str {
    match action {
        AuditAction::Create => "create",
        AuditAction::Update => "update",
        AuditAction::Cancel => "cancel",
        AuditAction::Approve => "approve",
        AuditAction::Reject => "reject",
        AuditAction::StatusChange => "status_change",
    }
}

fn parse_audit_action(value: &str) -> Result<AuditAction, RepositoryError> {
    match value {
        "create" => Ok(AuditAction::Create),
        "update" => Ok(AuditAction::Update),
        "cancel" => Ok(AuditAction::Cancel),
        "approve" => Ok(AuditAction::Approve),
        "reject" => Ok(AuditAction::Reject),
        "status_change" => Ok(AuditAction::StatusChange),
        other => Err(RepositoryError::Decode(format!("unknown audit action `{other}`"))),
    }
}

pub fn audit_entity_as_str(entity: AuditEntity) -> &'static str {
    match entity {
        AuditEntity::Booking => "booking",
        AuditEntity::Approval => "approval",
        AuditEntity::Vehicle => "vehicle",
    }
}

fn parse_audit_entity(value: &str) -> Result<AuditEntity, RepositoryError> {
    match value {
        "booking" => Ok(AuditEntity::Booking),
        "approval" => Ok(AuditEntity::Approval),
        "vehicle" => Ok(AuditEntity::Vehicle),
        other => Err(RepositoryError::Decode(format!("unknown audit entity `{other}`"))),
    }
}

fn parse_values(value: Option<String>) -> Result<Option<serde_json::Value>, RepositoryError> {
    value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("bad audit snapshot: {error}")))
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let actor_id: Option<String> = row.try_get("actor_id").map_err(decode)?;
    let action: String = row.try_get("action").map_err(decode)?;
    let entity_type: String = row.try_get("entity_type").map_err(decode)?;
    let entity_id: String = row.try_get("entity_id").map_err(decode)?;
    let old_values: Option<String> = row.try_get("old_values").map_err(decode)?;
    let new_values: Option<String> = row.try_get("new_values").map_err(decode)?;
    let description: String = row.try_get("description").map_err(decode)?;
    let source_ip: Option<String> = row.try_get("source_ip").map_err(decode)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode)?;

    Ok(AuditEntry {
        id,
        actor: actor_id.map(UserId),
        action: parse_audit_action(&action)?,
        entity: parse_audit_entity(&entity_type)?,
        entity_id,
        old_values: parse_values(old_values)?,
        new_values: parse_values(new_values)?,
        description,
        source_ip,
        occurred_at: parse_ts(&occurred_at)?,
    })
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO audit_log (id, actor_id, action, entity_type, entity_id, old_values,
                                    new_values, description, source_ip, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.actor.as_ref().map(|id| id.0.clone()))
        .bind(audit_action_as_str(entry.action))
        .bind(audit_entity_as_str(entry.entity))
        .bind(&entry.entity_id)
        .bind(entry.old_values.as_ref().map(|v| v.to_string()))
        .bind(entry.new_values.as_ref().map(|v| v.to_string()))
        .bind(&entry.description)
        .bind(&entry.source_ip)
        .bind(format_ts(entry.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: Page,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let mut query = sqlx::QueryBuilder::new(
            "SELECT id, actor_id, action, entity_type, entity_id, old_values, new_values,
                    description, source_ip, occurred_at
             FROM audit_log WHERE 1 = 1",
        );
        if let Some(entity) = filter.entity {
            query.push(" AND entity_type = ").push_bind(audit_entity_as_str(entity));
        }
        if let Some(entity_id) = &filter.entity_id {
            query.push(" AND entity_id = ").push_bind(entity_id.clone());
        }
        if let Some(actor) = &filter.actor {
            query.push(" AND actor_id = ").push_bind(actor.0.clone());
        }
        if let Some(action) = filter.action {
            query.push(" AND action = ").push_bind(audit_action_as_str(action));
        }
        if let Some(from) = filter.from {
            query.push(" AND occurred_at >= ").push_bind(format_ts(from));
        }
        if let Some(until) = filter.until {
            query.push(" AND occurred_at < ").push_bind(format_ts(until));
        }
        query
            .push(" ORDER BY occurred_at ASC, id ASC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use motorpool_core::audit::{AuditAction, AuditEntity, AuditEntry};
    use motorpool_core::domain::user::UserId;

    use super::SqlAuditLogRepository;
    use crate::repositories::{AuditFilter, AuditLogRepository, Page};
    use crate::{connect_with_settings, migrations};

    async fn pool() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn append_and_filter_by_entity() {
        let pool = pool().await;
        let repo = SqlAuditLogRepository::new(pool);

        repo.append(
            &AuditEntry::new(AuditAction::Create, AuditEntity::Booking, "b-1", "booking created")
                .by(UserId("emp-1".to_string()))
                .with_values(None, Some(json!({"status": "pending"}))),
        )
        .await
        .expect("append");
        repo.append(&AuditEntry::new(
            AuditAction::Approve,
            AuditEntity::Approval,
            "a-1",
            "level 1 approved",
        ))
        .await
        .expect("append");

        let booking_entries = repo
            .query(
                &AuditFilter {
                    entity: Some(AuditEntity::Booking),
                    entity_id: Some("b-1".to_string()),
                    ..AuditFilter::default()
                },
                Page::default(),
            )
            .await
            .expect("query");
        assert_eq!(booking_entries.len(), 1);
        assert_eq!(booking_entries[0].action, AuditAction::Create);
        assert_eq!(
            booking_entries[0].new_values,
            Some(json!({"status": "pending"}))
        );

        let system_entries = repo
            .query(
                &AuditFilter { action: Some(AuditAction::Approve), ..AuditFilter::default() },
                Page::default(),
            )
            .await
            .expect("query");
        assert_eq!(system_entries.len(), 1);
        assert!(system_entries[0].actor.is_none());
    }
}

use sqlx::Row;

use motorpool_core::domain::approval::{Approval, ApprovalId, ApprovalLevel, ApprovalStatus};
use motorpool_core::domain::booking::BookingId;
use motorpool_core::domain::user::UserId;
use motorpool_core::workflow::DecisionPlan;

use super::booking::booking_status_as_str;
use super::{format_ts, parse_opt_ts, parse_ts, ApprovalFilter, ApprovalRepository, Page, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn approval_status_as_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
        ApprovalStatus::Cancelled => "cancelled",
    }
}

fn parse_approval_status(value: &str) -> Result<ApprovalStatus, RepositoryError> {
    match value {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        "cancelled" => Ok(ApprovalStatus::Cancelled),
        other => Err(RepositoryError::Decode(format!("unknown approval status `{other}`"))),
    }
}

const APPROVAL_COLUMNS: &str =
    "id, booking_id, approver_id, level, status, comments, decided_at, created_at, updated_at";

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<Approval, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let booking_id: String = row.try_get("booking_id").map_err(decode)?;
    let approver_id: Option<String> = row.try_get("approver_id").map_err(decode)?;
    let level: i64 = row.try_get("level").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let comments: Option<String> = row.try_get("comments").map_err(decode)?;
    let decided_at: Option<String> = row.try_get("decided_at").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    let level = ApprovalLevel::from_number(level)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval level `{level}`")))?;

    Ok(Approval {
        id: ApprovalId(id),
        booking_id: BookingId(booking_id),
        approver: approver_id.map(UserId),
        level,
        status: parse_approval_status(&status)?,
        comments,
        decided_at: parse_opt_ts(decided_at)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approval WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_approval(r)?)),
            None => Ok(None),
        }
    }

    async fn find_for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval WHERE booking_id = ? ORDER BY level ASC"
        ))
        .bind(&booking_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }

    async fn list(
        &self,
        filter: &ApprovalFilter,
        page: Page,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let mut query =
            sqlx::QueryBuilder::new(format!("SELECT {APPROVAL_COLUMNS} FROM approval WHERE 1 = 1"));
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(approval_status_as_str(status));
        }
        if let Some(level) = filter.level {
            query.push(" AND level = ").push_bind(i64::from(level.number()));
        }
        if let Some(booking_id) = &filter.booking_id {
            query.push(" AND booking_id = ").push_bind(booking_id.0.clone());
        }
        if let Some(approver) = &filter.approver {
            query.push(" AND approver_id = ").push_bind(approver.0.clone());
        }
        query
            .push(" ORDER BY created_at ASC, level ASC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_approval).collect()
    }

    async fn apply_decision(&self, plan: &DecisionPlan) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The decided row is the serialization point: whoever flips it out
        // of pending first wins, and the loser's whole plan is discarded.
        let decided = sqlx::query(
            "UPDATE approval SET approver_id = ?, status = ?, comments = ?, decided_at = ?,
                                 updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(plan.approval.approver.as_ref().map(|id| id.0.clone()))
        .bind(approval_status_as_str(plan.approval.status))
        .bind(&plan.approval.comments)
        .bind(plan.approval.decided_at.map(format_ts))
        .bind(format_ts(plan.approval.updated_at))
        .bind(&plan.approval.id.0)
        .execute(&mut *tx)
        .await?;

        if decided.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some(sibling) = &plan.sibling {
            sqlx::query(
                "UPDATE approval SET status = ?, comments = ?, updated_at = ?
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(approval_status_as_str(sibling.status))
            .bind(&sibling.comments)
            .bind(format_ts(sibling.updated_at))
            .bind(&sibling.id.0)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(booking) = &plan.booking {
            sqlx::query(
                "UPDATE booking SET status = ?, rejection_reason = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(booking_status_as_str(booking.status))
            .bind(&booking.rejection_reason)
            .bind(format_ts(booking.updated_at))
            .bind(&booking.id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use motorpool_core::domain::approval::{
        Approval, ApprovalId, ApprovalLevel, ApprovalStatus,
    };
    use motorpool_core::domain::booking::{Booking, BookingId, BookingStatus, ReservationWindow};
    use motorpool_core::domain::fleet::{Vehicle, VehicleId, VehicleStatus};
    use motorpool_core::domain::user::{Role, User, UserId};
    use motorpool_core::workflow::{plan_decision, Decision, DecisionSnapshot};

    use super::SqlApprovalRepository;
    use crate::repositories::{
        ApprovalFilter, ApprovalRepository, BookingRepository, Page, SqlBookingRepository,
        SqlUserRepository, SqlVehicleRepository, UserRepository, VehicleRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn pool() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn booking(id: &str) -> Booking {
        let base = Utc::now();
        Booking {
            id: BookingId(id.to_string()),
            requester: UserId("emp-1".to_string()),
            created_by: None,
            vehicle_id: VehicleId("v-1".to_string()),
            driver_id: None,
            window: ReservationWindow::new(base + Duration::hours(2), base + Duration::hours(4))
                .expect("window"),
            status: BookingStatus::Pending,
            department: None,
            notes: None,
            rejection_reason: None,
            cancellation_reason: None,
            created_at: base,
            updated_at: base,
        }
    }

    fn approval(id: &str, booking_id: &str, level: ApprovalLevel) -> Approval {
        Approval {
            id: ApprovalId(id.to_string()),
            booking_id: BookingId(booking_id.to_string()),
            approver: None,
            level,
            status: ApprovalStatus::Pending,
            comments: None,
            decided_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn seed_booking(pool: &crate::DbPool, id: &str) -> (Booking, Approval, Approval) {
        let users = SqlUserRepository::new(pool.clone());
        let _ = users
            .insert(&User {
                id: UserId("emp-1".to_string()),
                display_name: "Employee One".to_string(),
                role: Role::Employee,
                department: None,
            })
            .await;
        let vehicles = SqlVehicleRepository::new(pool.clone());
        let _ = vehicles
            .insert(&Vehicle {
                id: VehicleId("v-1".to_string()),
                label: "Transit Van".to_string(),
                status: VehicleStatus::Available,
            })
            .await;

        let bookings = SqlBookingRepository::new(pool.clone());
        let stored = booking(id);
        let first = approval(&format!("{id}-l1"), id, ApprovalLevel::First);
        let second = approval(&format!("{id}-l2"), id, ApprovalLevel::Second);
        bookings
            .create_with_approvals(&stored, &[first.clone(), second.clone()])
            .await
            .expect("create");
        (stored, first, second)
    }

    #[tokio::test]
    async fn decision_apply_writes_all_rows_and_detects_stale_replays() {
        let pool = pool().await;
        let (stored, first, second) = seed_booking(&pool, "b-1").await;
        let repo = SqlApprovalRepository::new(pool.clone());

        let users = SqlUserRepository::new(pool.clone());
        users
            .insert(&User {
                id: UserId("l1-approver".to_string()),
                display_name: "Level One Approver".to_string(),
                role: Role::ApproverL1,
                department: None,
            })
            .await
            .expect("seed approver");

        let plan = plan_decision(
            DecisionSnapshot { booking: stored, approval: first.clone(), sibling: second },
            Decision::Rejected,
            Some("vehicle unsuitable".to_string()),
            &UserId("l1-approver".to_string()),
            Utc::now(),
        )
        .expect("plan");

        assert!(repo.apply_decision(&plan).await.expect("apply"));
        // Replaying the same plan must lose: the row already left pending.
        assert!(!repo.apply_decision(&plan).await.expect("reapply"));

        let decided = repo
            .find_by_id(&first.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(decided.status, ApprovalStatus::Rejected);
        assert_eq!(decided.approver, Some(UserId("l1-approver".to_string())));
        assert!(decided.decided_at.is_none());

        let sibling = repo
            .find_by_id(&ApprovalId("b-1-l2".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(sibling.status, ApprovalStatus::Cancelled);

        let bookings = SqlBookingRepository::new(pool.clone());
        let reloaded = bookings
            .find_by_id(&BookingId("b-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(reloaded.status, BookingStatus::Rejected);
        assert_eq!(reloaded.rejection_reason.as_deref(), Some("vehicle unsuitable"));
    }

    #[tokio::test]
    async fn list_filters_by_level_and_status() {
        let pool = pool().await;
        seed_booking(&pool, "b-1").await;
        let repo = SqlApprovalRepository::new(pool.clone());

        let level_two = repo
            .list(
                &ApprovalFilter {
                    status: Some(ApprovalStatus::Pending),
                    level: Some(ApprovalLevel::Second),
                    ..ApprovalFilter::default()
                },
                Page::default(),
            )
            .await
            .expect("list");
        assert_eq!(level_two.len(), 1);
        assert_eq!(level_two[0].id.0, "b-1-l2");
    }

    #[tokio::test]
    async fn find_for_booking_returns_levels_in_order() {
        let pool = pool().await;
        seed_booking(&pool, "b-1").await;
        let repo = SqlApprovalRepository::new(pool.clone());

        let rows = repo
            .find_for_booking(&BookingId("b-1".to_string()))
            .await
            .expect("find");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].level, ApprovalLevel::First);
        assert_eq!(rows[1].level, ApprovalLevel::Second);
    }
}

use sqlx::Row;

use motorpool_core::domain::approval::Approval;
use motorpool_core::domain::booking::{Booking, BookingId, BookingStatus, ReservationWindow};
use motorpool_core::domain::fleet::{DriverId, VehicleId};
use motorpool_core::domain::user::UserId;
use motorpool_core::workflow::CancellationPlan;

use super::approval::approval_status_as_str;
use super::{
    format_ts, parse_ts, BookingFilter, BookingRepository, CreateBookingOutcome, Page,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn booking_status_as_str(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "pending",
        BookingStatus::InProgress => "in_progress",
        BookingStatus::Approved => "approved",
        BookingStatus::Rejected => "rejected",
        BookingStatus::Cancelled => "cancelled",
        BookingStatus::Completed => "completed",
    }
}

fn parse_booking_status(value: &str) -> Result<BookingStatus, RepositoryError> {
    match value {
        "pending" => Ok(BookingStatus::Pending),
        "in_progress" => Ok(BookingStatus::InProgress),
        "approved" => Ok(BookingStatus::Approved),
        "rejected" => Ok(BookingStatus::Rejected),
        "cancelled" => Ok(BookingStatus::Cancelled),
        "completed" => Ok(BookingStatus::Completed),
        other => Err(RepositoryError::Decode(format!("unknown booking status `{other}`"))),
    }
}

const BOOKING_COLUMNS: &str = "id, requester_id, created_by, vehicle_id, driver_id, starts_at, \
                               ends_at, status, department, notes, rejection_reason, \
                               cancellation_reason, created_at, updated_at";

fn row_to_booking(row: &sqlx::sqlite::SqliteRow) -> Result<Booking, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let requester_id: String = row.try_get("requester_id").map_err(decode)?;
    let created_by: Option<String> = row.try_get("created_by").map_err(decode)?;
    let vehicle_id: String = row.try_get("vehicle_id").map_err(decode)?;
    let driver_id: Option<String> = row.try_get("driver_id").map_err(decode)?;
    let starts_at: String = row.try_get("starts_at").map_err(decode)?;
    let ends_at: String = row.try_get("ends_at").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let department: Option<String> = row.try_get("department").map_err(decode)?;
    let notes: Option<String> = row.try_get("notes").map_err(decode)?;
    let rejection_reason: Option<String> = row.try_get("rejection_reason").map_err(decode)?;
    let cancellation_reason: Option<String> = row.try_get("cancellation_reason").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    let window = ReservationWindow::new(parse_ts(&starts_at)?, parse_ts(&ends_at)?)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Booking {
        id: BookingId(id),
        requester: UserId(requester_id),
        created_by: created_by.map(UserId),
        vehicle_id: VehicleId(vehicle_id),
        driver_id: driver_id.map(DriverId),
        window,
        status: parse_booking_status(&status)?,
        department,
        notes,
        rejection_reason,
        cancellation_reason,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_booking(r)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: &BookingFilter,
        page: Page,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let mut query = sqlx::QueryBuilder::new(
            "SELECT DISTINCT b.id, b.requester_id, b.created_by, b.vehicle_id, b.driver_id, \
             b.starts_at, b.ends_at, b.status, b.department, b.notes, b.rejection_reason, \
             b.cancellation_reason, b.created_at, b.updated_at FROM booking b",
        );
        if filter.approver.is_some() {
            query.push(" JOIN approval a ON a.booking_id = b.id");
        }
        query.push(" WHERE 1 = 1");
        if let Some(status) = filter.status {
            query.push(" AND b.status = ").push_bind(booking_status_as_str(status));
        }
        if let Some(vehicle_id) = &filter.vehicle_id {
            query.push(" AND b.vehicle_id = ").push_bind(vehicle_id.0.clone());
        }
        if let Some(requester) = &filter.requester {
            query.push(" AND b.requester_id = ").push_bind(requester.0.clone());
        }
        if let Some(approver) = &filter.approver {
            query.push(" AND a.approver_id = ").push_bind(approver.0.clone());
        }
        if let Some(from) = filter.from {
            query.push(" AND b.ends_at > ").push_bind(format_ts(from));
        }
        if let Some(until) = filter.until {
            query.push(" AND b.starts_at < ").push_bind(format_ts(until));
        }
        query
            .push(" ORDER BY b.starts_at ASC, b.id ASC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_booking).collect()
    }

    async fn create_with_approvals(
        &self,
        booking: &Booking,
        approvals: &[Approval],
    ) -> Result<CreateBookingOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Same predicate as the pure detector: slot-holding statuses,
        // half-open overlap. Running it inside the insert transaction is
        // what makes two concurrent creates for the same vehicle mutually
        // exclusive.
        let colliding = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE vehicle_id = ? AND status IN ('pending', 'approved', 'in_progress')
               AND starts_at < ? AND ends_at > ?
             LIMIT 1"
        ))
        .bind(&booking.vehicle_id.0)
        .bind(format_ts(booking.window.end()))
        .bind(format_ts(booking.window.start()))
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref row) = colliding {
            return Ok(CreateBookingOutcome::Conflict(row_to_booking(row)?));
        }

        sqlx::query(
            "INSERT INTO booking (id, requester_id, created_by, vehicle_id, driver_id, starts_at,
                                  ends_at, status, department, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&booking.id.0)
        .bind(&booking.requester.0)
        .bind(booking.created_by.as_ref().map(|id| id.0.clone()))
        .bind(&booking.vehicle_id.0)
        .bind(booking.driver_id.as_ref().map(|id| id.0.clone()))
        .bind(format_ts(booking.window.start()))
        .bind(format_ts(booking.window.end()))
        .bind(booking_status_as_str(booking.status))
        .bind(&booking.department)
        .bind(&booking.notes)
        .bind(format_ts(booking.created_at))
        .bind(format_ts(booking.updated_at))
        .execute(&mut *tx)
        .await?;

        for approval in approvals {
            sqlx::query(
                "INSERT INTO approval (id, booking_id, approver_id, level, status, comments,
                                       decided_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&approval.id.0)
            .bind(&approval.booking_id.0)
            .bind(approval.approver.as_ref().map(|id| id.0.clone()))
            .bind(i64::from(approval.level.number()))
            .bind(approval_status_as_str(approval.status))
            .bind(&approval.comments)
            .bind(approval.decided_at.map(format_ts))
            .bind(format_ts(approval.created_at))
            .bind(format_ts(approval.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CreateBookingOutcome::Created)
    }

    async fn update_fields(
        &self,
        booking: &Booking,
        expected_status: BookingStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE booking SET driver_id = ?, starts_at = ?, ends_at = ?, department = ?,
                                notes = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(booking.driver_id.as_ref().map(|id| id.0.clone()))
        .bind(format_ts(booking.window.start()))
        .bind(format_ts(booking.window.end()))
        .bind(&booking.department)
        .bind(&booking.notes)
        .bind(format_ts(booking.updated_at))
        .bind(&booking.id.0)
        .bind(booking_status_as_str(expected_status))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_cancellation(&self, plan: &CancellationPlan) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let booking = sqlx::query(
            "UPDATE booking SET status = 'cancelled', cancellation_reason = ?, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'approved')",
        )
        .bind(&plan.booking.cancellation_reason)
        .bind(format_ts(plan.booking.updated_at))
        .bind(&plan.booking.id.0)
        .execute(&mut *tx)
        .await?;

        if booking.rows_affected() == 0 {
            return Ok(false);
        }

        for approval in &plan.cancelled_approvals {
            sqlx::query(
                "UPDATE approval SET status = 'cancelled', comments = ?, updated_at = ?
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(&approval.comments)
            .bind(format_ts(approval.updated_at))
            .bind(&approval.id.0)
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

    use motorpool_core::domain::approval::{Approval, ApprovalId, ApprovalLevel, ApprovalStatus};
    use motorpool_core::domain::booking::{Booking, BookingId, BookingStatus, ReservationWindow};
    use motorpool_core::domain::fleet::{Vehicle, VehicleId, VehicleStatus};
    use motorpool_core::domain::user::{Role, User, UserId};
    use motorpool_core::workflow::plan_cancellation;

    use super::SqlBookingRepository;
    use crate::repositories::{
        BookingFilter, BookingRepository, CreateBookingOutcome, Page, SqlUserRepository,
        SqlVehicleRepository, UserRepository, VehicleRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn pool() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn seed_directory(pool: &crate::DbPool) {
        let users = SqlUserRepository::new(pool.clone());
        users
            .insert(&User {
                id: UserId("emp-1".to_string()),
                display_name: "Employee One".to_string(),
                role: Role::Employee,
                department: Some("logistics".to_string()),
            })
            .await
            .expect("user");
        let vehicles = SqlVehicleRepository::new(pool.clone());
        vehicles
            .insert(&Vehicle {
                id: VehicleId("v-1".to_string()),
                label: "Transit Van".to_string(),
                status: VehicleStatus::Available,
            })
            .await
            .expect("vehicle");
    }

    fn booking(id: &str, status: BookingStatus, start_h: i64, end_h: i64) -> Booking {
        let base = Utc::now();
        Booking {
            id: BookingId(id.to_string()),
            requester: UserId("emp-1".to_string()),
            created_by: None,
            vehicle_id: VehicleId("v-1".to_string()),
            driver_id: None,
            window: ReservationWindow::new(
                base + Duration::hours(start_h),
                base + Duration::hours(end_h),
            )
            .expect("window"),
            status,
            department: None,
            notes: None,
            rejection_reason: None,
            cancellation_reason: None,
            created_at: base,
            updated_at: base,
        }
    }

    fn approval_rows(booking_id: &str) -> Vec<Approval> {
        [ApprovalLevel::First, ApprovalLevel::Second]
            .into_iter()
            .map(|level| Approval {
                id: ApprovalId(format!("{booking_id}-l{}", level.number())),
                booking_id: BookingId(booking_id.to_string()),
                approver: None,
                level,
                status: ApprovalStatus::Pending,
                comments: None,
                decided_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .collect()
    }

    #[tokio::test]
    async fn create_persists_booking_and_both_levels() {
        let pool = pool().await;
        seed_directory(&pool).await;
        let repo = SqlBookingRepository::new(pool.clone());

        let outcome = repo
            .create_with_approvals(&booking("b-1", BookingStatus::Pending, 1, 3), &approval_rows("b-1"))
            .await
            .expect("create");
        assert!(matches!(outcome, CreateBookingOutcome::Created));

        let stored = repo
            .find_by_id(&BookingId("b-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(stored.status, BookingStatus::Pending);

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM approval WHERE booking_id = 'b-1'")
                .fetch_one(&pool)
                .await
                .expect("count");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn create_detects_active_overlap() {
        let pool = pool().await;
        seed_directory(&pool).await;
        let repo = SqlBookingRepository::new(pool.clone());

        repo.create_with_approvals(&booking("b-1", BookingStatus::Approved, 8, 12), &approval_rows("b-1"))
            .await
            .expect("create approved booking");

        let outcome = repo
            .create_with_approvals(&booking("b-2", BookingStatus::Pending, 10, 14), &approval_rows("b-2"))
            .await
            .expect("conflict check");
        match outcome {
            CreateBookingOutcome::Conflict(colliding) => assert_eq!(colliding.id.0, "b-1"),
            CreateBookingOutcome::Created => panic!("overlap must be rejected"),
        }

        assert!(repo
            .find_by_id(&BookingId("b-2".to_string()))
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn a_pending_request_already_holds_the_slot() {
        let pool = pool().await;
        seed_directory(&pool).await;
        let repo = SqlBookingRepository::new(pool.clone());

        repo.create_with_approvals(&booking("b-1", BookingStatus::Pending, 8, 12), &approval_rows("b-1"))
            .await
            .expect("create pending booking");
        let outcome = repo
            .create_with_approvals(&booking("b-2", BookingStatus::Pending, 10, 14), &approval_rows("b-2"))
            .await
            .expect("create second booking");
        assert!(matches!(outcome, CreateBookingOutcome::Conflict(_)));
    }

    #[tokio::test]
    async fn rejected_bookings_free_the_slot() {
        let pool = pool().await;
        seed_directory(&pool).await;
        let repo = SqlBookingRepository::new(pool.clone());

        repo.create_with_approvals(&booking("b-1", BookingStatus::Rejected, 8, 12), &approval_rows("b-1"))
            .await
            .expect("create rejected booking");
        let outcome = repo
            .create_with_approvals(&booking("b-2", BookingStatus::Pending, 10, 14), &approval_rows("b-2"))
            .await
            .expect("create second booking");
        assert!(matches!(outcome, CreateBookingOutcome::Created));
    }

    #[tokio::test]
    async fn back_to_back_windows_coexist() {
        let pool = pool().await;
        seed_directory(&pool).await;
        let repo = SqlBookingRepository::new(pool.clone());

        repo.create_with_approvals(&booking("b-1", BookingStatus::Approved, 8, 12), &approval_rows("b-1"))
            .await
            .expect("create");
        let outcome = repo
            .create_with_approvals(&booking("b-2", BookingStatus::Pending, 12, 16), &approval_rows("b-2"))
            .await
            .expect("create adjacent");
        assert!(matches!(outcome, CreateBookingOutcome::Created));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_requester() {
        let pool = pool().await;
        seed_directory(&pool).await;
        let repo = SqlBookingRepository::new(pool.clone());

        repo.create_with_approvals(&booking("b-1", BookingStatus::Pending, 1, 3), &approval_rows("b-1"))
            .await
            .expect("create");
        repo.create_with_approvals(&booking("b-2", BookingStatus::Approved, 4, 6), &approval_rows("b-2"))
            .await
            .expect("create");

        let pending = repo
            .list(
                &BookingFilter {
                    status: Some(BookingStatus::Pending),
                    requester: Some(UserId("emp-1".to_string())),
                    ..BookingFilter::default()
                },
                Page::default(),
            )
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.0, "b-1");
    }

    #[tokio::test]
    async fn cancellation_is_guarded_by_status() {
        let pool = pool().await;
        seed_directory(&pool).await;
        let repo = SqlBookingRepository::new(pool.clone());

        let stored = booking("b-1", BookingStatus::Pending, 2, 4);
        repo.create_with_approvals(&stored, &approval_rows("b-1")).await.expect("create");

        let plan = plan_cancellation(stored.clone(), approval_rows("b-1"), "not needed", Utc::now())
            .expect("plan");
        assert!(repo.apply_cancellation(&plan).await.expect("apply"));
        // Second apply is stale: the booking already left pending.
        assert!(!repo.apply_cancellation(&plan).await.expect("reapply"));

        let reloaded = repo
            .find_by_id(&BookingId("b-1".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(reloaded.status, BookingStatus::Cancelled);
        assert_eq!(reloaded.cancellation_reason.as_deref(), Some("not needed"));
    }
}

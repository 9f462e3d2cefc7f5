use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use motorpool_core::audit::{AuditAction, AuditEntity, AuditEntry};
use motorpool_core::domain::approval::{Approval, ApprovalId, ApprovalLevel, ApprovalStatus};
use motorpool_core::domain::booking::{Booking, BookingId, BookingStatus};
use motorpool_core::domain::fleet::{Driver, DriverId, Vehicle, VehicleId, VehicleStatus};
use motorpool_core::domain::user::{User, UserId};
use motorpool_core::workflow::{CancellationPlan, DecisionPlan};

pub mod approval;
pub mod audit_log;
pub mod booking;
pub mod memory;
pub mod registry;

pub use approval::SqlApprovalRepository;
pub use audit_log::SqlAuditLogRepository;
pub use booking::SqlBookingRepository;
pub use memory::{InMemoryAuditLogRepository, InMemoryRegistry, InMemoryWorkflowStore};
pub use registry::{SqlDriverRepository, SqlUserRepository, SqlVehicleRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Offset pagination shared by every list surface.
#[derive(Clone, Copy, Debug)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub vehicle_id: Option<VehicleId>,
    pub requester: Option<UserId>,
    /// Bookings whose approval rows name this user as approver.
    pub approver: Option<UserId>,
    /// Bookings whose window intersects `[from, until)`.
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    pub level: Option<ApprovalLevel>,
    pub booking_id: Option<BookingId>,
    pub approver: Option<UserId>,
}

#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub entity: Option<AuditEntity>,
    pub entity_id: Option<String>,
    pub actor: Option<UserId>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Result of the create-time conflict check + insert unit of work.
#[derive(Clone, Debug)]
pub enum CreateBookingOutcome {
    Created,
    /// The insert was abandoned; the colliding booking is returned for the
    /// error message.
    Conflict(Booking),
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;

    async fn list(&self, filter: &BookingFilter, page: Page)
        -> Result<Vec<Booking>, RepositoryError>;

    /// Runs the double-booking check and, when clear, inserts the booking
    /// together with both approval rows — one unit of work, serialized
    /// against concurrent creates so two overlapping windows cannot both
    /// pass the check.
    async fn create_with_approvals(
        &self,
        booking: &Booking,
        approvals: &[Approval],
    ) -> Result<CreateBookingOutcome, RepositoryError>;

    /// Persists field edits. Guarded on the status the caller read; returns
    /// false when the booking moved on in the meantime.
    async fn update_fields(
        &self,
        booking: &Booking,
        expected_status: BookingStatus,
    ) -> Result<bool, RepositoryError>;

    /// Applies an administrative cancellation plan atomically. Returns false
    /// when the booking already left the status the plan was computed from.
    async fn apply_cancellation(&self, plan: &CancellationPlan) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError>;

    async fn find_for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<Approval>, RepositoryError>;

    async fn list(&self, filter: &ApprovalFilter, page: Page)
        -> Result<Vec<Approval>, RepositoryError>;

    /// Applies a decision plan atomically: the decided row, the cascaded
    /// sibling, and the booking status flip commit together or not at all.
    /// Returns false when a concurrent decision already claimed the row.
    async fn apply_decision(&self, plan: &DecisionPlan) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError>;

    async fn query(&self, filter: &AuditFilter, page: Page)
        -> Result<Vec<AuditEntry>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn insert(&self, user: &User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait VehicleRepository: Send + Sync {
    async fn find_by_id(&self, id: &VehicleId) -> Result<Option<Vehicle>, RepositoryError>;
    async fn insert(&self, vehicle: &Vehicle) -> Result<(), RepositoryError>;

    /// Guarded status flip: the row changes only when it is still in
    /// `from`. Returns whether a row actually changed.
    async fn transition_status(
        &self,
        id: &VehicleId,
        from: VehicleStatus,
        to: VehicleStatus,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait DriverRepository: Send + Sync {
    async fn find_by_id(&self, id: &DriverId) -> Result<Option<Driver>, RepositoryError>;
    async fn insert(&self, driver: &Driver) -> Result<(), RepositoryError>;
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn format_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("bad timestamp `{value}`: {error}")))
}

pub(crate) fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_ts).transpose()
}

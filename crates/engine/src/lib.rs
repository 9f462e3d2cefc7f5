pub mod approvals;
pub mod bookings;
pub mod recorder;
pub mod vehicle_sync;

use std::sync::Arc;

use motorpool_core::domain::user::UserId;
use motorpool_db::repositories::{
    SqlApprovalRepository, SqlAuditLogRepository, SqlBookingRepository, SqlDriverRepository,
    SqlUserRepository, SqlVehicleRepository,
};
use motorpool_db::DbPool;

pub use approvals::{ApprovalListRequest, ApprovalService, DecisionRequest};
pub use bookings::{
    ApproverAssignments, BookingPatch, BookingService, CancelBookingRequest, CreateBookingRequest,
};
pub use recorder::AuditRecorder;
pub use vehicle_sync::VehicleStatusSync;

/// Who is asking, and from where. Carried by every public operation so the
/// authorization table and the audit trail both see the same caller.
#[derive(Clone, Debug)]
pub struct ActorContext {
    pub user_id: UserId,
    pub source_ip: Option<String>,
}

impl ActorContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, source_ip: None }
    }

    pub fn from_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }
}

/// The engine's two public services wired over SQL repositories.
pub struct Services {
    pub bookings: BookingService,
    pub approvals: ApprovalService,
}

impl Services {
    pub fn from_pool(pool: DbPool) -> Self {
        let bookings = Arc::new(SqlBookingRepository::new(pool.clone()));
        let approvals = Arc::new(SqlApprovalRepository::new(pool.clone()));
        let users = Arc::new(SqlUserRepository::new(pool.clone()));
        let vehicles = Arc::new(SqlVehicleRepository::new(pool.clone()));
        let drivers = Arc::new(SqlDriverRepository::new(pool.clone()));
        let audit = Arc::new(AuditRecorder::new(Arc::new(SqlAuditLogRepository::new(pool))));
        let vehicle_sync = VehicleStatusSync::new(vehicles.clone());

        Self {
            bookings: BookingService::new(
                bookings.clone(),
                approvals.clone(),
                users.clone(),
                vehicles,
                drivers,
                vehicle_sync.clone(),
                audit.clone(),
            ),
            approvals: ApprovalService::new(approvals, bookings, users, vehicle_sync, audit),
        }
    }
}

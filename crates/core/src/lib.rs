pub mod audit;
pub mod config;
pub mod conflict;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use audit::{AuditAction, AuditEntity, AuditEntry, AuditSink, InMemoryAuditSink};
pub use conflict::{find_conflict, holds_window};
pub use domain::approval::{Approval, ApprovalId, ApprovalLevel, ApprovalStatus};
pub use domain::booking::{Booking, BookingId, BookingStatus, ReservationWindow};
pub use domain::fleet::{Driver, DriverId, DriverStatus, Vehicle, VehicleId, VehicleStatus};
pub use domain::user::{Role, User, UserId};
pub use errors::{EngineError, WorkflowError};
pub use workflow::{
    plan_cancellation, plan_decision, CancellationPlan, Decision, DecisionPlan, DecisionSnapshot,
    VehicleEffect,
};

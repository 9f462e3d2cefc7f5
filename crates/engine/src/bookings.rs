//! Booking lifecycle management: create, field edits, administrative
//! cancellation, and the read surface. Owns the booking state machine and
//! leans on the conflict detector, vehicle synchronizer, and audit sink.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use motorpool_core::audit::{AuditAction, AuditEntity, AuditEntry, AuditSink};
use motorpool_core::conflict::{find_conflict, holds_window};
use motorpool_core::domain::approval::{Approval, ApprovalId, ApprovalLevel, ApprovalStatus};
use motorpool_core::domain::booking::{Booking, BookingId, BookingStatus, ReservationWindow};
use motorpool_core::domain::fleet::{DriverId, VehicleId};
use motorpool_core::domain::user::{Role, User, UserId};
use motorpool_core::errors::{EngineError, WorkflowError};
use motorpool_core::workflow::plan_cancellation;
use motorpool_db::repositories::{
    ApprovalRepository, BookingFilter, BookingRepository, CreateBookingOutcome, DriverRepository,
    Page, UserRepository, VehicleRepository,
};

use crate::vehicle_sync::VehicleStatusSync;
use crate::ActorContext;

#[derive(Clone, Debug, Default)]
pub struct ApproverAssignments {
    pub first: Option<UserId>,
    pub second: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct CreateBookingRequest {
    pub requester: UserId,
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
    pub window: ReservationWindow,
    pub department: Option<String>,
    pub notes: Option<String>,
    pub approvers: ApproverAssignments,
}

/// Field edits for a pending booking. Outer `None` means "leave as is";
/// `Some(None)` clears an optional field.
#[derive(Clone, Debug, Default)]
pub struct BookingPatch {
    pub driver_id: Option<Option<DriverId>>,
    pub window: Option<ReservationWindow>,
    pub department: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(Clone, Debug)]
pub struct CancelBookingRequest {
    pub booking_id: BookingId,
    pub reason: String,
}

pub struct BookingService {
    bookings: Arc<dyn BookingRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    users: Arc<dyn UserRepository>,
    vehicles: Arc<dyn VehicleRepository>,
    drivers: Arc<dyn DriverRepository>,
    vehicle_sync: VehicleStatusSync,
    audit: Arc<dyn AuditSink>,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        users: Arc<dyn UserRepository>,
        vehicles: Arc<dyn VehicleRepository>,
        drivers: Arc<dyn DriverRepository>,
        vehicle_sync: VehicleStatusSync,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { bookings, approvals, users, vehicles, drivers, vehicle_sync, audit }
    }

    async fn require_user(&self, id: &UserId) -> Result<User, EngineError> {
        self.users
            .find_by_id(id)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| WorkflowError::not_found("user", id.0.clone()).into())
    }

    async fn require_booking(&self, id: &BookingId) -> Result<Booking, EngineError> {
        self.bookings
            .find_by_id(id)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| WorkflowError::not_found("booking", id.0.clone()).into())
    }

    async fn check_assignment(
        &self,
        assigned: &UserId,
        level: ApprovalLevel,
    ) -> Result<(), EngineError> {
        let user = self.require_user(assigned).await?;
        if user.role.approval_level() != Some(level) {
            return Err(WorkflowError::Validation(format!(
                "user `{}` cannot decide level {} approvals",
                assigned.0,
                level.number()
            ))
            .into());
        }
        Ok(())
    }

    /// Validates the request, runs the double-booking check, and persists
    /// the booking together with its two approval rows in one unit of work.
    /// The vehicle is left untouched here; it flips to `in_use` only when
    /// level-one approval activates the booking.
    pub async fn create(
        &self,
        ctx: &ActorContext,
        request: CreateBookingRequest,
    ) -> Result<Booking, EngineError> {
        let actor = self.require_user(&ctx.user_id).await?;
        let created_by = match actor.role {
            Role::Admin => Some(actor.id.clone()),
            Role::Employee => {
                if request.requester != actor.id {
                    return Err(WorkflowError::denied(
                        "employees can only request bookings for themselves",
                    )
                    .into());
                }
                None
            }
            Role::ApproverL1 | Role::ApproverL2 => {
                return Err(WorkflowError::denied("approvers cannot create bookings").into())
            }
        };

        let now = Utc::now();
        if request.window.start() < now {
            return Err(WorkflowError::Validation(
                "reservation window must start in the future".to_string(),
            )
            .into());
        }

        self.require_user(&request.requester).await?;
        self.vehicles
            .find_by_id(&request.vehicle_id)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| WorkflowError::not_found("vehicle", request.vehicle_id.0.clone()))?;
        if let Some(driver_id) = &request.driver_id {
            self.drivers
                .find_by_id(driver_id)
                .await
                .map_err(EngineError::persistence)?
                .ok_or_else(|| WorkflowError::not_found("driver", driver_id.0.clone()))?;
        }
        if let Some(assigned) = &request.approvers.first {
            self.check_assignment(assigned, ApprovalLevel::First).await?;
        }
        if let Some(assigned) = &request.approvers.second {
            self.check_assignment(assigned, ApprovalLevel::Second).await?;
        }

        let booking = Booking {
            id: BookingId(Uuid::new_v4().to_string()),
            requester: request.requester,
            created_by,
            vehicle_id: request.vehicle_id,
            driver_id: request.driver_id,
            window: request.window,
            status: BookingStatus::Pending,
            department: request.department,
            notes: request.notes,
            rejection_reason: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        let approvals: Vec<Approval> = [
            (ApprovalLevel::First, request.approvers.first),
            (ApprovalLevel::Second, request.approvers.second),
        ]
        .into_iter()
        .map(|(level, approver)| Approval {
            id: ApprovalId(Uuid::new_v4().to_string()),
            booking_id: booking.id.clone(),
            approver,
            level,
            status: ApprovalStatus::Pending,
            comments: None,
            decided_at: None,
            created_at: now,
            updated_at: now,
        })
        .collect();

        let outcome = self
            .bookings
            .create_with_approvals(&booking, &approvals)
            .await
            .map_err(EngineError::persistence)?;
        if let CreateBookingOutcome::Conflict(colliding) = outcome {
            return Err(WorkflowError::Conflict { conflicting: colliding.id }.into());
        }

        self.audit
            .record(
                audit_entry(
                    ctx,
                    AuditAction::Create,
                    AuditEntity::Booking,
                    &booking.id.0,
                    format!(
                        "booking requested for vehicle `{}` from {} to {}",
                        booking.vehicle_id.0,
                        booking.window.start(),
                        booking.window.end()
                    ),
                )
                .by(actor.id)
                .with_values(
                    None,
                    Some(json!({
                        "status": "pending",
                        "vehicle_id": booking.vehicle_id.0,
                        "starts_at": booking.window.start(),
                        "ends_at": booking.window.end(),
                    })),
                ),
            )
            .await;

        Ok(booking)
    }

    pub async fn get(&self, ctx: &ActorContext, id: &BookingId) -> Result<Booking, EngineError> {
        let actor = self.require_user(&ctx.user_id).await?;
        let booking = self.require_booking(id).await?;
        match actor.role {
            Role::Employee if booking.requester != actor.id => {
                Err(WorkflowError::denied("employees can only view their own bookings").into())
            }
            Role::Employee | Role::ApproverL1 | Role::ApproverL2 | Role::Admin => Ok(booking),
        }
    }

    /// Paginated listing. Employees are clamped to their own bookings no
    /// matter what filter they pass.
    pub async fn list(
        &self,
        ctx: &ActorContext,
        mut filter: BookingFilter,
        page: Page,
    ) -> Result<Vec<Booking>, EngineError> {
        let actor = self.require_user(&ctx.user_id).await?;
        match actor.role {
            Role::Employee => filter.requester = Some(actor.id),
            Role::ApproverL1 | Role::ApproverL2 | Role::Admin => {}
        }
        self.bookings.list(&filter, page).await.map_err(EngineError::persistence)
    }

    /// Applies field edits, persisting only fields whose value actually
    /// changed. A no-op patch writes nothing — not even an audit entry.
    pub async fn update(
        &self,
        ctx: &ActorContext,
        id: &BookingId,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        let actor = self.require_user(&ctx.user_id).await?;
        let booking = self.require_booking(id).await?;

        let owner_while_pending =
            booking.requester == actor.id && booking.status == BookingStatus::Pending;
        match actor.role {
            Role::Admin => {}
            Role::Employee if owner_while_pending => {}
            Role::Employee => {
                return Err(WorkflowError::denied(
                    "only the requester may edit a booking, and only while it is pending",
                )
                .into())
            }
            Role::ApproverL1 | Role::ApproverL2 => {
                return Err(WorkflowError::denied("approvers cannot edit bookings").into())
            }
        }

        let mut updated = booking.clone();
        let mut old_values = serde_json::Map::new();
        let mut new_values = serde_json::Map::new();

        if let Some(driver_id) = patch.driver_id {
            if driver_id != booking.driver_id {
                if let Some(new_driver) = &driver_id {
                    self.drivers
                        .find_by_id(new_driver)
                        .await
                        .map_err(EngineError::persistence)?
                        .ok_or_else(|| {
                            WorkflowError::not_found("driver", new_driver.0.clone())
                        })?;
                }
                old_values.insert("driver_id".into(), json!(booking.driver_id));
                new_values.insert("driver_id".into(), json!(driver_id));
                updated.driver_id = driver_id;
            }
        }
        if let Some(window) = patch.window {
            if window != booking.window {
                if window.start() < Utc::now() {
                    return Err(WorkflowError::Validation(
                        "reservation window must start in the future".to_string(),
                    )
                    .into());
                }
                old_values.insert(
                    "window".into(),
                    json!({"starts_at": booking.window.start(), "ends_at": booking.window.end()}),
                );
                new_values.insert(
                    "window".into(),
                    json!({"starts_at": window.start(), "ends_at": window.end()}),
                );
                updated.window = window;
            }
        }
        if let Some(department) = patch.department {
            if department != booking.department {
                old_values.insert("department".into(), json!(booking.department));
                new_values.insert("department".into(), json!(department));
                updated.department = department;
            }
        }
        if let Some(notes) = patch.notes {
            if notes != booking.notes {
                old_values.insert("notes".into(), json!(booking.notes));
                new_values.insert("notes".into(), json!(notes));
                updated.notes = notes;
            }
        }

        if new_values.is_empty() {
            return Ok(booking);
        }

        // A window edit must not introduce an overlap the create-time check
        // would have refused.
        if holds_window(&updated) && updated.window != booking.window {
            let candidates = self
                .bookings
                .list(
                    &BookingFilter {
                        vehicle_id: Some(updated.vehicle_id.clone()),
                        ..BookingFilter::default()
                    },
                    Page { limit: u32::MAX, offset: 0 },
                )
                .await
                .map_err(EngineError::persistence)?;
            let others = candidates.iter().filter(|candidate| candidate.id != updated.id);
            if let Some(colliding) = find_conflict(others, &updated.vehicle_id, &updated.window) {
                return Err(WorkflowError::Conflict { conflicting: colliding.id.clone() }.into());
            }
        }

        updated.updated_at = Utc::now();
        let applied = self
            .bookings
            .update_fields(&updated, booking.status)
            .await
            .map_err(EngineError::persistence)?;
        if !applied {
            return Err(EngineError::Persistence(
                "booking changed concurrently; re-read and retry".to_string(),
            ));
        }

        let changed: Vec<&str> = new_values.keys().map(String::as_str).collect();
        self.audit
            .record(
                audit_entry(
                    ctx,
                    AuditAction::Update,
                    AuditEntity::Booking,
                    &updated.id.0,
                    format!("booking fields changed: {}", changed.join(", ")),
                )
                .by(actor.id)
                .with_values(
                    Some(serde_json::Value::Object(old_values)),
                    Some(serde_json::Value::Object(new_values)),
                ),
            )
            .await;

        Ok(updated)
    }

    /// Administrative cancellation. Allowed from pending or approved only;
    /// still-pending approvals are forced to cancelled, and an activated
    /// vehicle is returned to the pool.
    pub async fn cancel(
        &self,
        ctx: &ActorContext,
        request: CancelBookingRequest,
    ) -> Result<Booking, EngineError> {
        let actor = self.require_user(&ctx.user_id).await?;
        match actor.role {
            Role::Admin => {}
            Role::Employee | Role::ApproverL1 | Role::ApproverL2 => {
                return Err(
                    WorkflowError::denied("only administrators can cancel bookings").into()
                )
            }
        }

        let booking = self.require_booking(&request.booking_id).await?;
        let approvals = self
            .approvals
            .find_for_booking(&booking.id)
            .await
            .map_err(EngineError::persistence)?;

        let prior_status = booking.status;
        let plan = plan_cancellation(booking, approvals, &request.reason, Utc::now())?;

        let applied = self
            .bookings
            .apply_cancellation(&plan)
            .await
            .map_err(EngineError::persistence)?;
        if !applied {
            // Lost the race: someone moved the booking first. Report the
            // transition against the fresh status.
            let fresh = self.require_booking(&request.booking_id).await?;
            return Err(WorkflowError::InvalidStateTransition {
                from: fresh.status,
                to: BookingStatus::Cancelled,
            }
            .into());
        }

        if let Some(effect) = plan.vehicle_effect {
            self.vehicle_sync.apply(effect, &plan.booking.vehicle_id).await;
        }

        self.audit
            .record(
                audit_entry(
                    ctx,
                    AuditAction::Cancel,
                    AuditEntity::Booking,
                    &plan.booking.id.0,
                    format!("booking cancelled by administrator: {}", request.reason.trim()),
                )
                .by(actor.id)
                .with_values(
                    Some(json!({"status": prior_status})),
                    Some(json!({
                        "status": "cancelled",
                        "cancellation_reason": plan.booking.cancellation_reason,
                    })),
                ),
            )
            .await;
        for approval in &plan.cancelled_approvals {
            self.audit
                .record(
                    audit_entry(
                        ctx,
                        AuditAction::Cancel,
                        AuditEntity::Approval,
                        &approval.id.0,
                        format!(
                            "level {} approval cancelled: booking was cancelled",
                            approval.level.number()
                        ),
                    )
                    .with_values(
                        Some(json!({"status": "pending"})),
                        Some(json!({"status": "cancelled"})),
                    ),
                )
                .await;
        }

        Ok(plan.booking)
    }
}

pub(crate) fn audit_entry(
    ctx: &ActorContext,
    action: AuditAction,
    entity: AuditEntity,
    entity_id: &str,
    description: String,
) -> AuditEntry {
    let entry = AuditEntry::new(action, entity, entity_id, description);
    match &ctx.source_ip {
        Some(ip) => entry.from_ip(ip.clone()),
        None => entry,
    }
}

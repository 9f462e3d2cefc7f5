//! The two-level approval coordinator. Decisions are planned from a fresh
//! snapshot of the booking and both approval rows, applied atomically, and
//! audited per row written — a single rejecting decision can therefore
//! yield three audit entries: the decision, the sibling cancellation, and
//! the booking status change.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use motorpool_core::audit::{AuditAction, AuditEntity, AuditSink};
use motorpool_core::domain::approval::{Approval, ApprovalId, ApprovalLevel, ApprovalStatus};
use motorpool_core::domain::booking::{Booking, BookingId};
use motorpool_core::domain::user::{Role, User, UserId};
use motorpool_core::errors::{EngineError, WorkflowError};
use motorpool_core::workflow::{plan_decision, Decision, DecisionSnapshot};
use motorpool_db::repositories::{
    ApprovalFilter, ApprovalRepository, BookingRepository, Page, UserRepository,
};

use crate::bookings::audit_entry;
use crate::vehicle_sync::VehicleStatusSync;
use crate::ActorContext;

#[derive(Clone, Debug)]
pub struct DecisionRequest {
    pub approval_id: ApprovalId,
    pub decision: Decision,
    pub comments: Option<String>,
}

/// Listing request for the approval queue. `show_all` lifts the
/// pending-only default; the level filter is forced to the caller's own
/// level unless the caller is an administrator.
#[derive(Clone, Debug, Default)]
pub struct ApprovalListRequest {
    pub status: Option<ApprovalStatus>,
    pub level: Option<ApprovalLevel>,
    pub booking_id: Option<BookingId>,
    pub show_all: bool,
}

pub struct ApprovalService {
    approvals: Arc<dyn ApprovalRepository>,
    bookings: Arc<dyn BookingRepository>,
    users: Arc<dyn UserRepository>,
    vehicle_sync: VehicleStatusSync,
    audit: Arc<dyn AuditSink>,
}

impl ApprovalService {
    pub fn new(
        approvals: Arc<dyn ApprovalRepository>,
        bookings: Arc<dyn BookingRepository>,
        users: Arc<dyn UserRepository>,
        vehicle_sync: VehicleStatusSync,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { approvals, bookings, users, vehicle_sync, audit }
    }

    async fn require_user(&self, id: &UserId) -> Result<User, EngineError> {
        self.users
            .find_by_id(id)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| WorkflowError::not_found("user", id.0.clone()).into())
    }

    /// Records one level's decision and applies the resulting cascade.
    /// Returns the decided approval and the booking if its status moved.
    pub async fn record_decision(
        &self,
        ctx: &ActorContext,
        request: DecisionRequest,
    ) -> Result<(Approval, Option<Booking>), EngineError> {
        let actor = self.require_user(&ctx.user_id).await?;

        let approval = self
            .approvals
            .find_by_id(&request.approval_id)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| WorkflowError::not_found("approval", request.approval_id.0.clone()))?;

        match actor.role.approval_level() {
            Some(level) if level == approval.level => {}
            Some(_) | None => {
                return Err(WorkflowError::denied(format!(
                    "only level {} approvers can decide this approval",
                    approval.level.number()
                ))
                .into())
            }
        }
        if approval.is_pending() {
            if let Some(assigned) = &approval.approver {
                if assigned != &actor.id {
                    return Err(WorkflowError::denied(format!(
                        "approval is assigned to `{}`",
                        assigned.0
                    ))
                    .into());
                }
            }
        }

        let booking = self
            .bookings
            .find_by_id(&approval.booking_id)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| WorkflowError::not_found("booking", approval.booking_id.0.clone()))?;
        // Sibling status comes from the rows as they are now, never from
        // anything the caller supplied.
        let sibling = self
            .approvals
            .find_for_booking(&approval.booking_id)
            .await
            .map_err(EngineError::persistence)?
            .into_iter()
            .find(|candidate| candidate.level == approval.level.sibling())
            .ok_or_else(|| {
                EngineError::Persistence(format!(
                    "booking `{}` is missing its level {} approval row",
                    approval.booking_id.0,
                    approval.level.sibling().number()
                ))
            })?;

        let prior_booking_status = booking.status;
        let vehicle_id = booking.vehicle_id.clone();
        let plan = plan_decision(
            DecisionSnapshot { booking, approval, sibling },
            request.decision,
            request.comments,
            &actor.id,
            Utc::now(),
        )?;

        let applied = self
            .approvals
            .apply_decision(&plan)
            .await
            .map_err(EngineError::persistence)?;
        if !applied {
            // A concurrent decision flipped the row between our read and
            // our write.
            return Err(WorkflowError::AlreadyProcessed {
                approval: plan.approval.id.clone(),
            }
            .into());
        }

        if let Some(effect) = plan.vehicle_effect {
            self.vehicle_sync.apply(effect, &vehicle_id).await;
        }

        let decision_action = match request.decision {
            Decision::Approved => AuditAction::Approve,
            Decision::Rejected => AuditAction::Reject,
        };
        self.audit
            .record(
                audit_entry(
                    ctx,
                    decision_action,
                    AuditEntity::Approval,
                    &plan.approval.id.0,
                    format!(
                        "level {} {}",
                        plan.approval.level.number(),
                        match request.decision {
                            Decision::Approved => "approved",
                            Decision::Rejected => "rejected",
                        }
                    ),
                )
                .by(actor.id.clone())
                .with_values(
                    Some(json!({"status": "pending"})),
                    Some(json!({
                        "status": plan.approval.status,
                        "comments": plan.approval.comments,
                    })),
                ),
            )
            .await;
        if let Some(cancelled) = &plan.sibling {
            self.audit
                .record(
                    audit_entry(
                        ctx,
                        AuditAction::Cancel,
                        AuditEntity::Approval,
                        &cancelled.id.0,
                        format!(
                            "level {} approval cancelled after level {} rejection",
                            cancelled.level.number(),
                            plan.approval.level.number()
                        ),
                    )
                    .with_values(
                        Some(json!({"status": "pending"})),
                        Some(json!({"status": "cancelled"})),
                    ),
                )
                .await;
        }
        if let Some(updated) = &plan.booking {
            self.audit
                .record(
                    audit_entry(
                        ctx,
                        AuditAction::StatusChange,
                        AuditEntity::Booking,
                        &updated.id.0,
                        format!(
                            "booking moved from {prior_booking_status:?} to {:?} by level {} decision",
                            updated.status,
                            plan.approval.level.number()
                        ),
                    )
                    .by(actor.id.clone())
                    .with_values(
                        Some(json!({"status": prior_booking_status})),
                        Some(json!({
                            "status": updated.status,
                            "rejection_reason": updated.rejection_reason,
                        })),
                    ),
                )
                .await;
        }

        Ok((plan.approval, plan.booking))
    }

    /// The approval queue: administrators see everything, approvers only
    /// their own level, employees nothing.
    pub async fn list(
        &self,
        ctx: &ActorContext,
        request: ApprovalListRequest,
        page: Page,
    ) -> Result<Vec<Approval>, EngineError> {
        let actor = self.require_user(&ctx.user_id).await?;
        let level = match actor.role {
            Role::Admin => request.level,
            Role::ApproverL1 | Role::ApproverL2 => actor.role.approval_level(),
            Role::Employee => {
                return Err(
                    WorkflowError::denied("employees cannot list the approval queue").into()
                )
            }
        };
        let status = if request.show_all { request.status } else { request.status.or(Some(ApprovalStatus::Pending)) };

        let filter = ApprovalFilter {
            status,
            level,
            booking_id: request.booking_id,
            approver: None,
        };
        self.approvals.list(&filter, page).await.map_err(EngineError::persistence)
    }
}

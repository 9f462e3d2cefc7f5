//! Decision and cancellation planning.
//!
//! A plan is computed from a snapshot of the booking and both of its
//! approval rows, and lists every row that must be written plus the vehicle
//! side effect to request. Plans are pure values; the persistence layer
//! applies them in a single unit of work with status-guarded writes, so a
//! concurrent decision on the same row surfaces as a stale apply rather
//! than a lost update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{Approval, ApprovalLevel, ApprovalStatus};
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::user::UserId;
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// Vehicle availability side effect requested by a plan. Applied
/// best-effort after the plan itself commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleEffect {
    /// Booking activated; flip the vehicle `available -> in_use`.
    MarkInUse,
    /// Booking left the active set; flip `in_use -> available` only. A
    /// vehicle that moved to maintenance independently is left alone.
    Release,
}

/// Everything the coordinator read before deciding: the booking and both
/// approval rows, freshly loaded. Sibling status is always re-derived from
/// this snapshot, never from caller-supplied state.
#[derive(Clone, Debug)]
pub struct DecisionSnapshot {
    pub booking: Booking,
    pub approval: Approval,
    pub sibling: Approval,
}

#[derive(Clone, Debug)]
pub struct DecisionPlan {
    /// The decided row.
    pub approval: Approval,
    /// The sibling row, present only when the decision cascaded into it.
    pub sibling: Option<Approval>,
    /// The booking, present only when its status changed.
    pub booking: Option<Booking>,
    pub vehicle_effect: Option<VehicleEffect>,
}

#[derive(Clone, Debug)]
pub struct CancellationPlan {
    pub booking: Booking,
    /// Approvals that were still pending and are forced to cancelled.
    pub cancelled_approvals: Vec<Approval>,
    pub vehicle_effect: Option<VehicleEffect>,
}

fn cascade_comment(cause: ApprovalLevel) -> String {
    format!("cancelled automatically: level {} rejected the booking", cause.number())
}

const CANCELLED_BY_ADMIN_COMMENT: &str = "cancelled automatically: booking cancelled by administrator";

/// Computes the row writes for one approval decision.
///
/// The decided approval always transitions out of pending. The booking is
/// promoted on approvals (`pending -> in_progress` once level one agrees,
/// then `in_progress -> approved` once both levels agree) and demoted to
/// rejected on either level's rejection, cascading a still-pending sibling
/// to cancelled. A level-two approval ahead of level one is accepted and
/// leaves the booking untouched; the later level-one approval performs both
/// promotions in one plan.
pub fn plan_decision(
    snapshot: DecisionSnapshot,
    decision: Decision,
    comments: Option<String>,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<DecisionPlan, WorkflowError> {
    let DecisionSnapshot { mut booking, mut approval, mut sibling } = snapshot;

    if !approval.is_pending() {
        return Err(WorkflowError::AlreadyProcessed { approval: approval.id.clone() });
    }

    approval.approver = Some(actor.clone());
    approval.updated_at = now;

    match decision {
        Decision::Approved => {
            approval.status = ApprovalStatus::Approved;
            approval.decided_at = Some(now);
            approval.comments = comments;

            let sibling_approved = sibling.status == ApprovalStatus::Approved;
            let (booking_write, vehicle_effect) = match approval.level {
                ApprovalLevel::First => {
                    booking.transition_to(BookingStatus::InProgress)?;
                    if sibling_approved {
                        booking.transition_to(BookingStatus::Approved)?;
                    }
                    booking.updated_at = now;
                    (Some(booking), Some(VehicleEffect::MarkInUse))
                }
                ApprovalLevel::Second if sibling_approved => {
                    booking.transition_to(BookingStatus::Approved)?;
                    booking.updated_at = now;
                    (Some(booking), None)
                }
                // Level two decided ahead of level one: record it, leave the
                // booking below `approved` until level one catches up.
                ApprovalLevel::Second => (None, None),
            };

            Ok(DecisionPlan { approval, sibling: None, booking: booking_write, vehicle_effect })
        }
        Decision::Rejected => {
            let comments = match comments.as_deref().map(str::trim) {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => {
                    return Err(WorkflowError::Validation(
                        "comments are required when rejecting an approval".to_string(),
                    ))
                }
            };

            approval.status = ApprovalStatus::Rejected;
            approval.comments = Some(comments.clone());

            let was_in_progress = booking.status == BookingStatus::InProgress;
            booking.transition_to(BookingStatus::Rejected)?;
            booking.rejection_reason = Some(comments);
            booking.updated_at = now;

            let sibling_write = sibling.is_pending().then(|| {
                sibling.status = ApprovalStatus::Cancelled;
                sibling.comments = Some(cascade_comment(approval.level));
                sibling.updated_at = now;
                sibling
            });

            Ok(DecisionPlan {
                approval,
                sibling: sibling_write,
                booking: Some(booking),
                vehicle_effect: was_in_progress.then_some(VehicleEffect::Release),
            })
        }
    }
}

/// Computes the row writes for an administrative cancellation.
pub fn plan_cancellation(
    mut booking: Booking,
    approvals: Vec<Approval>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<CancellationPlan, WorkflowError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(WorkflowError::Validation(
            "a cancellation reason is required".to_string(),
        ));
    }

    let was_active = booking.is_active();
    booking.transition_to(BookingStatus::Cancelled)?;
    booking.cancellation_reason = Some(reason.to_string());
    booking.updated_at = now;

    let cancelled_approvals = approvals
        .into_iter()
        .filter(|approval| approval.is_pending())
        .map(|mut approval| {
            approval.status = ApprovalStatus::Cancelled;
            approval.comments = Some(CANCELLED_BY_ADMIN_COMMENT.to_string());
            approval.updated_at = now;
            approval
        })
        .collect();

    Ok(CancellationPlan {
        booking,
        cancelled_approvals,
        vehicle_effect: was_active.then_some(VehicleEffect::Release),
    })
}

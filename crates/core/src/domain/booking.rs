use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::fleet::{DriverId, VehicleId};
use crate::domain::user::UserId;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
    /// Terminal marker written by trip closeout, which lives outside this
    /// engine. No transition into it is defined here.
    Completed,
}

/// Half-open reservation interval `[start, end)`. Construction enforces
/// `start < end`; two windows where one ends exactly when the other starts
/// do not overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ReservationWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WorkflowError> {
        if start >= end {
            return Err(WorkflowError::Validation(format!(
                "reservation window must end after it starts ({start} >= {end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn overlaps(&self, other: &ReservationWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub requester: UserId,
    /// Set when an administrator filed the booking on an employee's behalf.
    pub created_by: Option<UserId>,
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
    pub window: ReservationWindow,
    pub status: BookingStatus,
    pub department: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Active bookings are the only ones that block a vehicle's window.
    pub fn is_active(&self) -> bool {
        matches!(self.status, BookingStatus::Approved | BookingStatus::InProgress)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self.status, next),
            (BookingStatus::Pending, BookingStatus::InProgress)
                | (BookingStatus::InProgress, BookingStatus::Approved)
                | (BookingStatus::Pending, BookingStatus::Rejected)
                | (BookingStatus::InProgress, BookingStatus::Rejected)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Approved, BookingStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: BookingStatus) -> Result<(), WorkflowError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(WorkflowError::InvalidStateTransition { from: self.status, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::fleet::VehicleId;
    use crate::domain::user::UserId;
    use crate::errors::WorkflowError;

    use super::{Booking, BookingId, BookingStatus, ReservationWindow};

    fn window(start_h: i64, end_h: i64) -> ReservationWindow {
        let base = Utc::now();
        ReservationWindow::new(base + Duration::hours(start_h), base + Duration::hours(end_h))
            .expect("valid window")
    }

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: BookingId("b-1".to_string()),
            requester: UserId("u-1".to_string()),
            created_by: None,
            vehicle_id: VehicleId("v-1".to_string()),
            driver_id: None,
            window: window(1, 3),
            status,
            department: None,
            notes: None,
            rejection_reason: None,
            cancellation_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn rejects_inverted_window() {
        let base = Utc::now();
        let error = ReservationWindow::new(base + Duration::hours(2), base + Duration::hours(1))
            .expect_err("inverted window");
        assert!(matches!(error, WorkflowError::Validation(_)));
    }

    #[test]
    fn rejects_empty_window() {
        let instant = Utc::now();
        assert!(ReservationWindow::new(instant, instant).is_err());
    }

    #[test]
    fn back_to_back_windows_do_not_overlap() {
        let first = window(1, 3);
        let second = window(3, 5);
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));
    }

    #[test]
    fn overlapping_windows_are_detected_both_ways() {
        let first = window(1, 4);
        let second = window(3, 6);
        assert!(first.overlaps(&second));
        assert!(second.overlaps(&first));
    }

    #[test]
    fn allows_full_approval_path() {
        let mut booking = booking(BookingStatus::Pending);
        booking.transition_to(BookingStatus::InProgress).expect("pending -> in_progress");
        booking.transition_to(BookingStatus::Approved).expect("in_progress -> approved");
        assert_eq!(booking.status, BookingStatus::Approved);
    }

    #[test]
    fn blocks_cancelling_a_rejected_booking() {
        let mut booking = booking(BookingStatus::Rejected);
        let error = booking
            .transition_to(BookingStatus::Cancelled)
            .expect_err("rejected -> cancelled should fail");
        assert!(matches!(
            error,
            WorkflowError::InvalidStateTransition {
                from: BookingStatus::Rejected,
                to: BookingStatus::Cancelled,
            }
        ));
    }

    #[test]
    fn blocks_skipping_to_approved_from_pending() {
        let mut booking = booking(BookingStatus::Pending);
        assert!(booking.transition_to(BookingStatus::Approved).is_err());
    }

    #[test]
    fn nothing_transitions_into_completed() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::InProgress,
            BookingStatus::Approved,
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
        ] {
            assert!(!booking(status).can_transition_to(BookingStatus::Completed));
        }
    }
}

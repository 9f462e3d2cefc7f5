//! Double-booking detection. Pure: the caller supplies the candidate
//! bookings, the detector decides whether any of them blocks the window.

use crate::domain::booking::{Booking, BookingStatus, ReservationWindow};
use crate::domain::fleet::VehicleId;

/// Whether this booking holds its slot on the vehicle against other
/// requests. Active bookings always do; an undecided (pending) request does
/// too, so that two overlapping requests can never both be granted later —
/// the approval path performs no window re-check. Rejected, cancelled, and
/// completed bookings free the slot.
pub fn holds_window(booking: &Booking) -> bool {
    matches!(
        booking.status,
        BookingStatus::Pending | BookingStatus::Approved | BookingStatus::InProgress
    )
}

/// Returns the first booking that blocks `window` on `vehicle`, if any.
///
/// The overlap test is half-open, so a booking ending exactly when another
/// starts is not a conflict. Which conflicting booking is returned when
/// several exist is unspecified; any one suffices for the error message.
pub fn find_conflict<'a, I>(
    existing: I,
    vehicle: &VehicleId,
    window: &ReservationWindow,
) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    existing
        .into_iter()
        .find(|booking| {
            booking.vehicle_id == *vehicle
                && holds_window(booking)
                && booking.window.overlaps(window)
        })
}

use ulid::Ulid;

use crate::interval::TimeInterval;
use crate::model::{Booking, BookingService};

/// Which key a conflict scan groups commitments by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    Staff,
    Client,
}

impl ConflictScope {
    fn key(self, booking: &Booking) -> Option<Ulid> {
        match self {
            ConflictScope::Staff => booking.staff_id,
            ConflictScope::Client => Some(booking.client_id),
        }
    }
}

/// An existing commitment colliding with a candidate interval. Enough
/// context for a caller to render "already booked between T1 and T2".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictHit {
    pub booking_id: Ulid,
    pub interval: TimeInterval,
}

/// The one overlap predicate shared by the read path (slot listing) and the
/// write path (authoritative pre-commit check). The store's range scans must
/// agree with this in-memory form; that equivalence is property-tested.
pub fn find_conflicts(
    candidate: &TimeInterval,
    subject: Ulid,
    scope: ConflictScope,
    bookings: &[Booking],
    exclude: Option<Ulid>,
) -> Vec<ConflictHit> {
    bookings
        .iter()
        .filter(|b| b.status.is_active())
        .filter(|b| scope.key(b) == Some(subject))
        .filter(|b| exclude != Some(b.id))
        .filter(|b| b.interval().overlaps(candidate))
        .map(|b| ConflictHit { booking_id: b.id, interval: b.interval() })
        .collect()
}

pub fn has_conflict(
    candidate: &TimeInterval,
    subject: Ulid,
    scope: ConflictScope,
    bookings: &[Booking],
    exclude: Option<Ulid>,
) -> bool {
    !find_conflicts(candidate, subject, scope, bookings, exclude).is_empty()
}

/// Same predicate over multi-service line items; the caller supplies items
/// whose parent booking is active.
pub fn find_item_conflicts(
    candidate: &TimeInterval,
    staff_id: Ulid,
    items: &[BookingService],
    exclude: Option<Ulid>,
) -> Vec<ConflictHit> {
    items
        .iter()
        .filter(|i| i.staff_id == staff_id)
        .filter(|i| exclude != Some(i.booking_id))
        .filter(|i| i.interval().overlaps(candidate))
        .map(|i| ConflictHit { booking_id: i.booking_id, interval: i.interval() })
        .collect()
}

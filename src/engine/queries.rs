use time::{Date, OffsetDateTime};
use ulid::Ulid;

use super::availability::slot_candidates;
use super::conflict::{find_conflicts, find_item_conflicts, ConflictHit, ConflictScope};
use super::{Engine, EngineError};
use crate::interval::TimeInterval;
use crate::model::{Absence, Slot, StaffSelector};
use crate::schedule::resolve_windows;

/// Result of a point availability probe for one staff member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityCheck {
    pub available: bool,
    pub conflicts: Vec<ConflictHit>,
    pub absence: Option<Absence>,
}

impl Engine {
    /// List slot candidates for one service on one day. Advisory: no locks
    /// are taken, the authoritative check happens again at booking time.
    ///
    /// An empty result means the day is closed (or the staff member does not
    /// work); taken slots come back present with `available = false`.
    pub async fn get_available_slots(
        &self,
        salon_id: Ulid,
        staff: StaffSelector,
        service_id: Ulid,
        date: Date,
    ) -> Result<Vec<Slot>, EngineError> {
        self.maybe_sweep().await;
        let salon = self
            .store()
            .salon(&salon_id)
            .ok_or(EngineError::SalonNotFound(salon_id))?;
        let staff = self.resolve_staff(&salon, staff)?;
        let service = self.salon_service(&salon, service_id)?;

        let day = TimeInterval::new(
            date.midnight().assume_utc(),
            date.next_day()
                .unwrap_or(date)
                .midnight()
                .assume_utc(),
        );
        let absences = self.store().approved_absences(&staff.id, &day);
        let windows = resolve_windows(&salon, Some(&staff), &absences, date);
        if windows.is_empty() {
            return Ok(Vec::new());
        }

        // One scan window covering every candidate this day can produce.
        let mut lo = windows[0].interval.start;
        let mut hi = windows[0].interval.end;
        for w in &windows {
            lo = lo.min(w.interval.start);
            hi = hi.max(w.interval.end);
        }
        let envelope = TimeInterval::new(lo, hi);

        let mut committed: Vec<TimeInterval> = self
            .store()
            .active_bookings_overlapping(ConflictScope::Staff, &staff.id, &envelope, None)
            .await
            .iter()
            .map(|b| b.interval())
            .collect();
        committed.extend(
            self.store()
                .active_line_items_overlapping(&staff.id, &envelope, None)
                .await
                .iter()
                .map(|i| i.interval()),
        );

        Ok(slot_candidates(
            &windows,
            service.duration_min,
            &salon.buffers,
            &committed,
            self.config().granularity_min,
        ))
    }

    /// Probe whether one staff member is free over an exact interval,
    /// reporting what collides when they are not. `exclude_booking` lets a
    /// reschedule flow ignore the booking being moved.
    pub async fn check_availability(
        &self,
        staff_id: Ulid,
        start: OffsetDateTime,
        end: OffsetDateTime,
        exclude_booking: Option<Ulid>,
    ) -> Result<AvailabilityCheck, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidTimeRange { start, end });
        }
        let staff = self
            .store()
            .staff_member(&staff_id)
            .ok_or(EngineError::StaffNotFound(staff_id))?;
        let span = TimeInterval::new(start, end);

        let absence = self
            .store()
            .approved_absences(&staff.id, &span)
            .into_iter()
            .next();

        let bookings = self
            .store()
            .active_bookings_overlapping(ConflictScope::Staff, &staff.id, &span, exclude_booking)
            .await;
        let mut conflicts =
            find_conflicts(&span, staff.id, ConflictScope::Staff, &bookings, exclude_booking);
        let items = self
            .store()
            .active_line_items_overlapping(&staff.id, &span, exclude_booking)
            .await;
        conflicts.extend(find_item_conflicts(&span, staff.id, &items, exclude_booking));

        Ok(AvailabilityCheck {
            available: conflicts.is_empty() && absence.is_none(),
            conflicts,
            absence,
        })
    }
}

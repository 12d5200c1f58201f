use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime, Time, Weekday};
use ulid::Ulid;

use crate::interval::TimeInterval;

pub const DAYS_PER_WEEK: usize = 7;

fn weekday_index(day: Weekday) -> usize {
    day.number_days_from_monday() as usize
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Canceled,
    NoShow,
}

impl BookingStatus {
    /// Active statuses occupy schedule time; canceled and no-show slots are
    /// released back to availability.
    pub fn is_active(self) -> bool {
        match self {
            BookingStatus::Pending
            | BookingStatus::Confirmed
            | BookingStatus::InProgress
            | BookingStatus::Completed => true,
            BookingStatus::Canceled | BookingStatus::NoShow => false,
        }
    }

    /// Statuses that count against the one-open-booking-per-salon client rule.
    pub fn holds_client_slot(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbsenceStatus {
    Pending,
    Approved,
    Rejected,
}

// ── Schedule configuration ───────────────────────────────────────

/// One open range of a salon's day, wall-clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start: Time,
    pub end: Time,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub closed: bool,
    pub windows: Vec<ScheduleWindow>,
}

impl DaySchedule {
    pub fn open(windows: Vec<ScheduleWindow>) -> Self {
        Self { closed: false, windows }
    }

    pub fn closed() -> Self {
        Self { closed: true, windows: Vec::new() }
    }
}

/// Per-weekday salon opening config. A missing day means no schedule is
/// defined, which reads the same as closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekSchedule {
    days: [Option<DaySchedule>; DAYS_PER_WEEK],
}

impl WeekSchedule {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Same schedule on all seven days.
    pub fn uniform(day: DaySchedule) -> Self {
        Self {
            days: std::array::from_fn(|_| Some(day.clone())),
        }
    }

    pub fn set(&mut self, day: Weekday, schedule: DaySchedule) {
        self.days[weekday_index(day)] = Some(schedule);
    }

    pub fn day(&self, day: Weekday) -> Option<&DaySchedule> {
        self.days[weekday_index(day)].as_ref()
    }
}

/// A staff member's single working range for one weekday, wall-clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffHours {
    pub start: Time,
    pub end: Time,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    days: [Option<StaffHours>; DAYS_PER_WEEK],
}

impl WeeklyHours {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn uniform(hours: StaffHours) -> Self {
        Self {
            days: std::array::from_fn(|_| Some(hours)),
        }
    }

    pub fn set(&mut self, day: Weekday, hours: StaffHours) {
        self.days[weekday_index(day)] = Some(hours);
    }

    pub fn day(&self, day: Weekday) -> Option<StaffHours> {
        self.days[weekday_index(day)]
    }
}

/// Salon-wide padding applied to every booking, in whole minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub before_min: u32,
    pub after_min: u32,
    pub processing_min: u32,
}

impl BufferConfig {
    pub const fn none() -> Self {
        Self { before_min: 0, after_min: 0, processing_min: 0 }
    }

    pub fn before(&self) -> Duration {
        Duration::minutes(self.before_min as i64)
    }

    pub fn after(&self) -> Duration {
        Duration::minutes(self.after_min as i64)
    }

    pub fn processing(&self) -> Duration {
        Duration::minutes(self.processing_min as i64)
    }

    /// Full occupancy of one service: before + duration + processing + after.
    pub fn padded(&self, duration_min: u32) -> Duration {
        Duration::minutes(
            self.before_min as i64
                + duration_min as i64
                + self.processing_min as i64
                + self.after_min as i64,
        )
    }
}

// ── Master data ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salon {
    pub id: Ulid,
    pub name: String,
    pub buffers: BufferConfig,
    pub schedule: WeekSchedule,
    /// Exceptional full-day closures overriding the weekday schedule.
    pub closed_dates: Vec<Date>,
}

impl Salon {
    pub fn is_closed_on(&self, date: Date) -> bool {
        self.closed_dates.contains(&date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub name: String,
    pub active: bool,
    pub weekly_hours: WeeklyHours,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub name: String,
    pub active: bool,
    pub duration_min: u32,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    /// Unverified clients book provisional holds that expire unless confirmed.
    pub verified: bool,
}

/// Staff unavailability. Only approved absences subtract from availability.
/// Stored as a half-open instant range so a partial-day absence can split a
/// working window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Absence {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub status: AbsenceStatus,
}

impl Absence {
    /// Whole-day absence covering `[start_date, end_date]` inclusive.
    pub fn full_days(
        staff_id: Ulid,
        start_date: Date,
        end_date: Date,
        status: AbsenceStatus,
    ) -> Self {
        let end = end_date
            .next_day()
            .unwrap_or(end_date)
            .midnight()
            .assume_utc();
        Self {
            id: Ulid::new(),
            staff_id,
            start: start_date.midnight().assume_utc(),
            end,
            status,
        }
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start, self.end)
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub client_id: Ulid,
    /// None only for multi-service parents; per-staff occupancy lives in the
    /// line items then.
    pub staff_id: Option<Ulid>,
    /// None for multi-service parents.
    pub service_id: Option<Ulid>,
    /// Buffer-inclusive, absolute.
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    /// Sum of raw service minutes, excluding buffers.
    pub duration_min: u32,
    pub price_cents: i64,
    pub status: BookingStatus,
    pub canceled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub is_multi_service: bool,
    pub notes: Option<String>,
}

impl Booking {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_time, self.end_time)
    }
}

/// One line item of a multi-service booking. Items are contiguous: each
/// starts where the previous one ends; only the last one carries the
/// trailing buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingService {
    pub booking_id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Ulid,
    /// 1-based execution order.
    pub order: u32,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub duration_min: u32,
    pub price_cents: i64,
}

impl BookingService {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_time, self.end_time)
    }
}

// ── Requests & read-model types ──────────────────────────────────

/// Staff choice on a booking request; "any" is resolved to a concrete staff
/// member before any scheduling math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaffSelector {
    Specific(Ulid),
    AnyAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub client_id: Ulid,
    pub salon_id: Ulid,
    pub staff: StaffSelector,
    pub service_id: Ulid,
    /// Requested service start as shown to the client; the stored interval
    /// begins `buffer_before` earlier.
    pub start: OffsetDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiBookingItem {
    pub service_id: Ulid,
    pub staff: StaffSelector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiBookingRequest {
    pub client_id: Ulid,
    pub salon_id: Ulid,
    pub items: Vec<MultiBookingItem>,
    pub start: OffsetDateTime,
    pub notes: Option<String>,
}

/// One open range of a resolved day, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingWindow {
    pub interval: TimeInterval,
    pub ordinal: usize,
}

/// A bookable start-time candidate. Unavailable candidates are still emitted
/// so a caller can tell "taken" apart from "closed" (no candidates at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub time: OffsetDateTime,
    pub available: bool,
}

/// Committed-booking events broadcast per salon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingEvent {
    Committed {
        booking_id: Ulid,
        staff_id: Option<Ulid>,
        interval: TimeInterval,
        status: BookingStatus,
    },
    Canceled {
        booking_id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, time};

    #[test]
    fn active_statuses_exclude_canceled_and_no_show() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(BookingStatus::InProgress.is_active());
        assert!(BookingStatus::Completed.is_active());
        assert!(!BookingStatus::Canceled.is_active());
        assert!(!BookingStatus::NoShow.is_active());
    }

    #[test]
    fn completed_does_not_hold_client_slot() {
        assert!(BookingStatus::Pending.holds_client_slot());
        assert!(!BookingStatus::Completed.holds_client_slot());
        assert!(!BookingStatus::Canceled.holds_client_slot());
    }

    #[test]
    fn week_schedule_lookup() {
        let mut schedule = WeekSchedule::empty();
        schedule.set(
            Weekday::Tuesday,
            DaySchedule::open(vec![ScheduleWindow { start: time!(9:00), end: time!(17:00) }]),
        );
        assert!(schedule.day(Weekday::Monday).is_none());
        let tue = schedule.day(Weekday::Tuesday).unwrap();
        assert_eq!(tue.windows.len(), 1);
    }

    #[test]
    fn buffer_padding_sums_all_parts() {
        let buffers = BufferConfig { before_min: 10, after_min: 10, processing_min: 5 };
        assert_eq!(buffers.padded(30), Duration::minutes(55));
        assert_eq!(BufferConfig::none().padded(30), Duration::minutes(30));
    }

    #[test]
    fn full_day_absence_is_half_open_through_last_day() {
        let a = Absence::full_days(
            Ulid::new(),
            date!(2030-06-03),
            date!(2030-06-04),
            AbsenceStatus::Approved,
        );
        assert_eq!(a.start, date!(2030-06-03).midnight().assume_utc());
        assert_eq!(a.end, date!(2030-06-05).midnight().assume_utc());
    }
}

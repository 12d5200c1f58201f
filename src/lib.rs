//! Scheduling and concurrency-control core for salon appointment booking:
//! computes bookable slots from salon/staff schedules and commits appointments
//! against shared staff/client time without double-booking.

pub mod config;
pub mod engine;
pub mod interval;
pub mod model;
pub mod notify;
pub mod observability;
pub mod schedule;
pub mod store;

pub use config::EngineConfig;
pub use engine::{
    AvailabilityCheck, ConflictHit, ConflictScope, Coordinator, Engine, EngineError, HoldSweeper,
    LockManager, MAX_TX_ATTEMPTS,
};
pub use interval::TimeInterval;
pub use model::{
    Absence, AbsenceStatus, Booking, BookingEvent, BookingRequest, BookingService, BookingStatus,
    BufferConfig, Client, DaySchedule, MultiBookingItem, MultiBookingRequest, Salon,
    ScheduleWindow, Service, Slot, Staff, StaffHours, StaffSelector, WeekSchedule, WeeklyHours,
    WorkingWindow,
};
pub use notify::{Notifier, NoopNotifier, NotifyError, NotifyHub};
pub use store::{BookingStore, Tx};

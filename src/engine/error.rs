use time::OffsetDateTime;
use ulid::Ulid;

use crate::interval::TimeInterval;
use crate::model::BookingStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    SalonNotFound(Ulid),
    StaffNotFound(Ulid),
    ServiceNotFound(Ulid),
    ClientNotFound(Ulid),
    BookingNotFound(Ulid),
    StaffInactive(Ulid),
    ServiceInactive(Ulid),
    StaffNotInSalon { staff_id: Ulid, salon_id: Ulid },
    NoStaffAvailable(Ulid),
    InvalidTimeRange { start: OffsetDateTime, end: OffsetDateTime },
    EmptyServiceList,
    /// The client already holds an open booking at this salon.
    AlreadyBooked { salon_id: Ulid },
    StaffConflict { staff_id: Ulid, interval: TimeInterval },
    ClientConflict { client_id: Ulid, interval: TimeInterval },
    InvalidTransition { booking_id: Ulid, from: BookingStatus, to: BookingStatus },
    /// Another transaction committed first; safe to retry the unit of work.
    SerializationConflict,
    NotificationFailed(String),
}

impl EngineError {
    /// Transient transaction failures the coordinator re-runs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::SerializationConflict)
    }

    /// Expected business outcomes: rejected requests, not system failures.
    pub fn is_business(&self) -> bool {
        !matches!(
            self,
            EngineError::SerializationConflict | EngineError::NotificationFailed(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyBooked { .. }
                | EngineError::StaffConflict { .. }
                | EngineError::ClientConflict { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SalonNotFound(id) => write!(f, "salon not found: {id}"),
            EngineError::StaffNotFound(id) => write!(f, "staff not found: {id}"),
            EngineError::ServiceNotFound(id) => write!(f, "service not found: {id}"),
            EngineError::ClientNotFound(id) => write!(f, "client not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::StaffInactive(id) => write!(f, "staff member {id} is not active"),
            EngineError::ServiceInactive(id) => write!(f, "service {id} is not active"),
            EngineError::StaffNotInSalon { staff_id, salon_id } => {
                write!(f, "staff member {staff_id} does not belong to salon {salon_id}")
            }
            EngineError::NoStaffAvailable(salon_id) => {
                write!(f, "salon {salon_id} has no active staff")
            }
            EngineError::InvalidTimeRange { start, end } => {
                write!(f, "invalid time range [{start}, {end})")
            }
            EngineError::EmptyServiceList => write!(f, "booking needs at least one service"),
            EngineError::AlreadyBooked { salon_id } => {
                write!(f, "client already has an open appointment at salon {salon_id}")
            }
            EngineError::StaffConflict { staff_id, interval } => write!(
                f,
                "staff member {staff_id} is already booked between {} and {}",
                interval.start, interval.end
            ),
            EngineError::ClientConflict { client_id, interval } => write!(
                f,
                "client {client_id} already has an appointment between {} and {}",
                interval.start, interval.end
            ),
            EngineError::InvalidTransition { booking_id, from, to } => write!(
                f,
                "booking {booking_id} cannot move from {from:?} to {to:?}"
            ),
            EngineError::SerializationConflict => {
                write!(f, "transaction conflicted with a concurrent writer, please retry")
            }
            EngineError::NotificationFailed(reason) => {
                write!(f, "notification delivery failed: {reason}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

use ulid::Ulid;

use crate::model::UserId;

/// Why a create/update/cancel was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    LaboratoryNotFoundOrInactive(Ulid),
    ReservationNotFound(Ulid),
    PermissionDenied { reservation: Ulid, user: UserId },
    InvalidDate { field: &'static str, value: String },
    InvalidOrdering,
    NotFuture,
    MultiDaySpan,
    TooShortDuration { minutes: i64 },
    MisalignedGrid,
    SchedulingConflict(Ulid),
    CancellationTooLate { minutes_left: i64 },
    DuplicateReservation(Ulid),
    MissingField(String),
    LimitExceeded(String),
    InfrastructureFailure(String),
}

/// Stable, machine-distinguishable classification of a `BookingError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LaboratoryNotFoundOrInactive,
    ReservationNotFound,
    PermissionDenied,
    InvalidDate,
    InvalidOrdering,
    NotFuture,
    MultiDaySpan,
    TooShortDuration,
    MisalignedGrid,
    SchedulingConflict,
    CancellationTooLate,
    DuplicateReservation,
    MissingField,
    LimitExceeded,
    InfrastructureFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::LaboratoryNotFoundOrInactive => "laboratory_not_found_or_inactive",
            ErrorKind::ReservationNotFound => "reservation_not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidDate => "invalid_date",
            ErrorKind::InvalidOrdering => "invalid_ordering",
            ErrorKind::NotFuture => "not_future",
            ErrorKind::MultiDaySpan => "multi_day_span",
            ErrorKind::TooShortDuration => "too_short_duration",
            ErrorKind::MisalignedGrid => "misaligned_grid",
            ErrorKind::SchedulingConflict => "scheduling_conflict",
            ErrorKind::CancellationTooLate => "cancellation_too_late",
            ErrorKind::DuplicateReservation => "duplicate_reservation",
            ErrorKind::MissingField => "missing_field",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::InfrastructureFailure => "infrastructure_failure",
        }
    }

    /// HTTP-style status class: 400 rule, 403 permission, 404 not found, 500 infrastructure.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::LaboratoryNotFoundOrInactive | ErrorKind::ReservationNotFound => 404,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::InfrastructureFailure => 500,
            _ => 400,
        }
    }

    pub fn is_rule_violation(self) -> bool {
        self != ErrorKind::InfrastructureFailure
    }
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::LaboratoryNotFoundOrInactive(_) => ErrorKind::LaboratoryNotFoundOrInactive,
            BookingError::ReservationNotFound(_) => ErrorKind::ReservationNotFound,
            BookingError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            BookingError::InvalidDate { .. } => ErrorKind::InvalidDate,
            BookingError::InvalidOrdering => ErrorKind::InvalidOrdering,
            BookingError::NotFuture => ErrorKind::NotFuture,
            BookingError::MultiDaySpan => ErrorKind::MultiDaySpan,
            BookingError::TooShortDuration { .. } => ErrorKind::TooShortDuration,
            BookingError::MisalignedGrid => ErrorKind::MisalignedGrid,
            BookingError::SchedulingConflict(_) => ErrorKind::SchedulingConflict,
            BookingError::CancellationTooLate { .. } => ErrorKind::CancellationTooLate,
            BookingError::DuplicateReservation(_) => ErrorKind::DuplicateReservation,
            BookingError::MissingField(_) => ErrorKind::MissingField,
            BookingError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            BookingError::InfrastructureFailure(_) => ErrorKind::InfrastructureFailure,
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::LaboratoryNotFoundOrInactive(id) => {
                write!(f, "laboratory not found or inactive: {id}")
            }
            BookingError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            BookingError::PermissionDenied { reservation, user } => {
                write!(f, "user {user} did not create reservation {reservation}")
            }
            BookingError::InvalidDate { field, value } => {
                write!(f, "invalid {field} timestamp: {value:?}")
            }
            BookingError::InvalidOrdering => write!(f, "start must be before end"),
            BookingError::NotFuture => write!(f, "reservation must start in the future"),
            BookingError::MultiDaySpan => {
                write!(f, "reservation must start and end on the same day")
            }
            BookingError::TooShortDuration { minutes } => {
                write!(f, "reservation must last at least 60 minutes, got {minutes}")
            }
            BookingError::MisalignedGrid => {
                write!(f, "reservation must start and end on the hour or half hour")
            }
            BookingError::SchedulingConflict(id) => {
                write!(f, "conflicts with reservation: {id}")
            }
            BookingError::CancellationTooLate { minutes_left } => write!(
                f,
                "cancellation needs at least 60 minutes notice, {minutes_left} left"
            ),
            BookingError::DuplicateReservation(id) => {
                write!(f, "reservation already exists: {id}")
            }
            BookingError::MissingField(field) => write!(f, "field {field} is required"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::InfrastructureFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

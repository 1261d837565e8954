use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};

use crate::model::{Span, Timestamp};

use super::BookingError;

/// Shortest bookable reservation.
pub const MIN_DURATION_MINUTES: i64 = 60;

/// Reservation endpoints must fall on multiples of this many minutes.
pub const GRID_MINUTES: u32 = 30;

/// Cancellations need at least this much notice before the start.
pub const CANCELLATION_NOTICE_MINUTES: i64 = 60;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a client-supplied timestamp onto the business wall clock.
///
/// RFC 3339 input with an explicit offset is converted into `offset`;
/// naive input is taken to already be business-local.
pub fn parse_timestamp(
    field: &'static str,
    raw: &str,
    offset: FixedOffset,
) -> Result<Timestamp, BookingError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&offset).naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| BookingError::InvalidDate {
            field,
            value: raw.to_string(),
        })
}

/// Ordering, futurity, same-day, minimum duration and grid alignment, in that order.
pub fn check_window(start: Timestamp, end: Timestamp, now: Timestamp) -> Result<Span, BookingError> {
    if start >= end {
        return Err(BookingError::InvalidOrdering);
    }
    if start <= now {
        return Err(BookingError::NotFuture);
    }
    if start.date() != end.date() {
        return Err(BookingError::MultiDaySpan);
    }
    let minutes = (end - start).num_minutes();
    if minutes < MIN_DURATION_MINUTES {
        return Err(BookingError::TooShortDuration { minutes });
    }
    if !on_grid(start) || !on_grid(end) {
        return Err(BookingError::MisalignedGrid);
    }
    Ok(Span::new(start, end))
}

pub fn on_grid(ts: Timestamp) -> bool {
    ts.second() == 0 && ts.nanosecond() == 0 && ts.minute() % GRID_MINUTES == 0
}

pub fn check_cancellation(start: Timestamp, now: Timestamp) -> Result<(), BookingError> {
    let minutes_left = (start - now).num_minutes();
    if minutes_left < CANCELLATION_NOTICE_MINUTES {
        return Err(BookingError::CancellationTooLate { minutes_left });
    }
    Ok(())
}

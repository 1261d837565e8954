use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Wall-clock timestamp in the business timezone, the only time type.
pub type Timestamp = NaiveDateTime;

/// Login name of the user that owns or acts on a reservation.
pub type UserId = String;

/// Closed interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Closed-interval overlap: touching endpoints count.
    pub fn overlaps(&self, other: &Span) -> bool {
        crate::booking::overlaps(self, other)
    }

    /// Calendar day the span starts on.
    pub fn day(&self) -> NaiveDate {
        self.start.date()
    }
}

/// A reservation as held inside its laboratory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub owner: UserId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LaboratoryState {
    pub id: Ulid,
    pub name: String,
    pub code: String,
    pub active: bool,
    /// All reservations, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl LaboratoryState {
    pub fn new(id: Ulid, name: String, code: String) -> Self {
        Self {
            id,
            name,
            code,
            active: true,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations starting on `day`. Binary search on both ends of the day.
    pub fn on_day(&self, day: NaiveDate) -> &[Reservation] {
        let (Some(from), Some(until)) = (day.and_hms_opt(0, 0, 0), day.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)))
        else {
            return &[];
        };
        let lo = self.reservations.partition_point(|r| r.span.start < from);
        let hi = self.reservations.partition_point(|r| r.span.start < until);
        &self.reservations[lo..hi]
    }

    /// Whether any reservation is still running or yet to come at `now`.
    pub fn has_current_or_upcoming(&self, now: Timestamp) -> bool {
        self.reservations.iter().any(|r| r.span.end >= now)
    }

    pub fn info(&self) -> LaboratoryInfo {
        LaboratoryInfo {
            id: self.id,
            name: self.name.clone(),
            code: self.code.clone(),
            active: self.active,
        }
    }

    pub fn reservation_info(&self, reservation: &Reservation) -> ReservationInfo {
        ReservationInfo {
            id: reservation.id,
            laboratory_id: self.id,
            owner: reservation.owner.clone(),
            span: reservation.span,
        }
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LaboratoryCreated {
        id: Ulid,
        name: String,
        code: String,
    },
    LaboratoryUpdated {
        id: Ulid,
        name: String,
        code: String,
    },
    LaboratoryStatusChanged {
        id: Ulid,
        active: bool,
    },
    LaboratoryDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        laboratory_id: Ulid,
        owner: UserId,
        span: Span,
    },
    ReservationUpdated {
        id: Ulid,
        laboratory_id: Ulid,
        span: Span,
    },
    ReservationCancelled {
        id: Ulid,
        laboratory_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaboratoryInfo {
    pub id: Ulid,
    pub name: String,
    pub code: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub laboratory_id: Ulid,
    pub owner: UserId,
    pub span: Span,
}

/// A reservation that passed every rule and is ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub laboratory_id: Ulid,
    pub owner: UserId,
    pub span: Span,
}

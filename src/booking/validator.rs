use std::sync::Arc;

use tracing::{debug, error};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;

use super::overlap::first_conflicting_reservation;
use super::rules::{check_cancellation, check_window, parse_timestamp};
use super::store::{ReservationStore, StoreError};
use super::BookingError;

/// A reservation request as it arrives from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedReservation {
    pub id: Ulid,
    pub laboratory_id: Ulid,
    pub window: ProposedWindow,
}

/// Unparsed start/end pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedWindow {
    pub start: String,
    pub end: String,
}

impl ProposedWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Runs the reservation rule pipeline and persists what passes.
///
/// Rules run in a fixed order and the first failure wins:
/// 1. laboratory exists and is active
/// 2. requester created the reservation (update/cancel)
/// 3. both timestamps parse
/// 4. start before end
/// 5. start after now
/// 6. start and end on the same day
/// 7. at least 60 minutes long
/// 8. both endpoints on the half-hour grid
/// 9. no overlap with the laboratory's reservations that day
pub struct ReservationValidator<S: ?Sized, C: ?Sized> {
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S: ?Sized, C: ?Sized> Clone for ReservationValidator<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: ReservationStore + ?Sized, C: Clock + ?Sized> ReservationValidator<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    pub async fn validate_for_create(
        &self,
        proposed: &ProposedReservation,
        owner: &str,
    ) -> Result<ReservationInfo, BookingError> {
        let result = self.create(proposed, owner).await;
        record("create", &result);
        result
    }

    pub async fn validate_for_update(
        &self,
        id: Ulid,
        window: &ProposedWindow,
        user: &str,
    ) -> Result<ReservationInfo, BookingError> {
        let result = self.update(id, window, user).await;
        record("update", &result);
        result
    }

    pub async fn validate_for_cancel(
        &self,
        id: Ulid,
        user: &str,
    ) -> Result<ReservationInfo, BookingError> {
        let result = self.cancel(id, user).await;
        record("cancel", &result);
        result
    }

    async fn create(
        &self,
        proposed: &ProposedReservation,
        owner: &str,
    ) -> Result<ReservationInfo, BookingError> {
        self.require_active_laboratory(proposed.laboratory_id).await?;
        let span = self.check_window(&proposed.window)?;
        self.check_no_conflict(proposed.laboratory_id, &span, None).await?;

        let new = NewReservation {
            id: proposed.id,
            laboratory_id: proposed.laboratory_id,
            owner: owner.to_string(),
            span,
        };
        self.store.create_reservation(new).await.map_err(store_err)
    }

    async fn update(
        &self,
        id: Ulid,
        window: &ProposedWindow,
        user: &str,
    ) -> Result<ReservationInfo, BookingError> {
        let existing = self.require_reservation(id).await?;
        self.require_active_laboratory(existing.laboratory_id).await?;
        require_owner(&existing, user)?;
        let span = self.check_window(window)?;
        self.check_no_conflict(existing.laboratory_id, &span, Some(id)).await?;

        self.store.update_reservation(id, span).await.map_err(store_err)
    }

    async fn cancel(&self, id: Ulid, user: &str) -> Result<ReservationInfo, BookingError> {
        let existing = self.require_reservation(id).await?;
        require_owner(&existing, user)?;
        check_cancellation(existing.span.start, self.clock.now())?;

        self.store.delete_reservation(id).await.map_err(store_err)
    }

    async fn require_active_laboratory(&self, id: Ulid) -> Result<LaboratoryInfo, BookingError> {
        match self.store.get_laboratory(id).await.map_err(store_err)? {
            Some(lab) if lab.active => Ok(lab),
            _ => Err(BookingError::LaboratoryNotFoundOrInactive(id)),
        }
    }

    async fn require_reservation(&self, id: Ulid) -> Result<ReservationInfo, BookingError> {
        self.store
            .get_reservation(id)
            .await
            .map_err(store_err)?
            .ok_or(BookingError::ReservationNotFound(id))
    }

    fn check_window(&self, window: &ProposedWindow) -> Result<Span, BookingError> {
        let offset = self.clock.offset();
        let start = parse_timestamp("start", &window.start, offset)?;
        let end = parse_timestamp("end", &window.end, offset)?;
        check_window(start, end, self.clock.now())
    }

    async fn check_no_conflict(
        &self,
        laboratory_id: Ulid,
        span: &Span,
        exclude: Option<Ulid>,
    ) -> Result<(), BookingError> {
        let same_day = self
            .store
            .list_reservations_for_lab_on_day(laboratory_id, span.day())
            .await
            .map_err(store_err)?;
        match first_conflicting_reservation(span, &same_day, exclude) {
            Some(other) => Err(BookingError::SchedulingConflict(other)),
            None => Ok(()),
        }
    }
}

fn require_owner(reservation: &ReservationInfo, user: &str) -> Result<(), BookingError> {
    if reservation.owner != user {
        return Err(BookingError::PermissionDenied {
            reservation: reservation.id,
            user: user.to_string(),
        });
    }
    Ok(())
}

fn store_err(e: StoreError) -> BookingError {
    match e {
        StoreError::Conflict(id) => BookingError::SchedulingConflict(id),
        StoreError::LaboratoryUnavailable(id) => BookingError::LaboratoryNotFoundOrInactive(id),
        StoreError::NotFound(id) => BookingError::ReservationNotFound(id),
        StoreError::AlreadyExists(id) => BookingError::DuplicateReservation(id),
        StoreError::MissingField(field) => BookingError::MissingField(field),
        StoreError::LimitExceeded(msg) => BookingError::LimitExceeded(msg),
        StoreError::Backend(msg) => {
            error!("reservation store failure: {msg}");
            BookingError::InfrastructureFailure(msg)
        }
    }
}

fn record(operation: &'static str, result: &Result<ReservationInfo, BookingError>) {
    let outcome = match result {
        Ok(info) => {
            debug!("{operation} accepted for reservation {}", info.id);
            "accepted"
        }
        Err(e) => {
            debug!("{operation} refused: {e}");
            e.kind().as_str()
        }
    };
    metrics::counter!(
        crate::observability::RESERVATION_DECISIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

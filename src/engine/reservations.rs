use ulid::Ulid;

use crate::booking::first_conflict;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Re-run the overlap check against the locked laboratory state.
fn check_no_conflict(
    ls: &LaboratoryState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let same_day = ls.on_day(span.day()).iter().map(|r| (r.id, &r.span));
    match first_conflict(span, same_day, exclude) {
        Some(other) => Err(EngineError::Conflict(other)),
        None => Ok(()),
    }
}

impl Engine {
    /// Store a reservation that already passed the rule pipeline.
    ///
    /// Activation and overlap are checked again under the laboratory's write
    /// lock, so of two overlapping requests racing each other only the first
    /// to take the lock is stored.
    pub async fn insert_reservation(
        &self,
        new: NewReservation,
    ) -> Result<ReservationInfo, EngineError> {
        if new.owner.is_empty() {
            return Err(EngineError::MissingField("owner"));
        }
        if new.owner.len() > MAX_USER_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        let ls = self
            .get_laboratory_state(&new.laboratory_id)
            .ok_or(EngineError::LaboratoryUnavailable(new.laboratory_id))?;
        let mut guard = ls.write().await;
        if !guard.active {
            return Err(EngineError::LaboratoryUnavailable(new.laboratory_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_LABORATORY {
            return Err(EngineError::LimitExceeded("too many reservations on laboratory"));
        }
        if self.reservation_to_lab.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        check_no_conflict(&guard, &new.span, None)?;

        let event = Event::ReservationCreated {
            id: new.id,
            laboratory_id: new.laboratory_id,
            owner: new.owner.clone(),
            span: new.span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(ReservationInfo {
            id: new.id,
            laboratory_id: new.laboratory_id,
            owner: new.owner,
            span: new.span,
        })
    }

    /// Move a reservation to a new window in the same laboratory.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        span: Span,
    ) -> Result<ReservationInfo, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let laboratory_id = guard.id;
        if !guard.active {
            return Err(EngineError::LaboratoryUnavailable(laboratory_id));
        }
        check_no_conflict(&guard, &span, Some(id))?;

        let event = Event::ReservationUpdated {
            id,
            laboratory_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .reservation(id)
            .map(|r| guard.reservation_info(r))
            .ok_or(EngineError::NotFound(id))
    }

    /// Remove a reservation, returning it as it was.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let info = guard
            .reservation(id)
            .map(|r| guard.reservation_info(r))
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::ReservationCancelled {
            id,
            laboratory_id: info.laboratory_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(info)
    }
}

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::booking::{ReservationStore, StoreError};
use crate::model::*;

use super::{Engine, EngineError};

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Conflict(id) => StoreError::Conflict(id),
            EngineError::LaboratoryUnavailable(id) => StoreError::LaboratoryUnavailable(id),
            EngineError::NotFound(id) => StoreError::NotFound(id),
            EngineError::AlreadyExists(id) => StoreError::AlreadyExists(id),
            EngineError::MissingField(field) => StoreError::MissingField(field.to_string()),
            EngineError::LimitExceeded(msg) => StoreError::LimitExceeded(msg.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
impl ReservationStore for Engine {
    async fn get_laboratory(&self, id: Ulid) -> Result<Option<LaboratoryInfo>, StoreError> {
        Ok(Engine::get_laboratory(self, id).await)
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Option<ReservationInfo>, StoreError> {
        Ok(Engine::get_reservation(self, id).await)
    }

    async fn list_reservations_for_lab_on_day(
        &self,
        laboratory_id: Ulid,
        day: NaiveDate,
    ) -> Result<Vec<ReservationInfo>, StoreError> {
        Ok(self.reservations_on_day(laboratory_id, day).await)
    }

    async fn create_reservation(&self, new: NewReservation) -> Result<ReservationInfo, StoreError> {
        Ok(self.insert_reservation(new).await?)
    }

    async fn update_reservation(&self, id: Ulid, span: Span) -> Result<ReservationInfo, StoreError> {
        Ok(Engine::update_reservation(self, id, span).await?)
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<ReservationInfo, StoreError> {
        Ok(self.cancel_reservation(id).await?)
    }
}

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// Failures reported by a `ReservationStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write would overlap the given reservation.
    Conflict(Ulid),
    /// The laboratory vanished or was deactivated before the write landed.
    LaboratoryUnavailable(Ulid),
    NotFound(Ulid),
    /// A reservation with this id is already stored.
    AlreadyExists(Ulid),
    MissingField(String),
    /// The write would push the store past one of its capacity limits.
    LimitExceeded(String),
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            StoreError::LaboratoryUnavailable(id) => write!(f, "laboratory unavailable: {id}"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::MissingField(field) => write!(f, "field {field} is required"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Backend(e) => write!(f, "backend error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence the reservation rules run against.
///
/// `create_reservation` and `update_reservation` must refuse, with
/// `StoreError::Conflict`, a write that overlaps a reservation stored
/// concurrently after the caller's day query. Without that guarantee two
/// overlapping requests racing each other can both succeed.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_laboratory(&self, id: Ulid) -> Result<Option<LaboratoryInfo>, StoreError>;

    async fn get_reservation(&self, id: Ulid) -> Result<Option<ReservationInfo>, StoreError>;

    async fn list_reservations_for_lab_on_day(
        &self,
        laboratory_id: Ulid,
        day: NaiveDate,
    ) -> Result<Vec<ReservationInfo>, StoreError>;

    async fn create_reservation(&self, new: NewReservation) -> Result<ReservationInfo, StoreError>;

    async fn update_reservation(&self, id: Ulid, span: Span) -> Result<ReservationInfo, StoreError>;

    /// Remove the reservation, returning what was removed.
    async fn delete_reservation(&self, id: Ulid) -> Result<ReservationInfo, StoreError>;
}

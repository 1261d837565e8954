mod error;
mod overlap;
pub mod rules;
mod store;
mod validator;

pub use error::{BookingError, ErrorKind};
pub use overlap::{first_conflict, first_conflicting_reservation, overlaps};
pub use store::{ReservationStore, StoreError};
pub use validator::{ProposedReservation, ProposedWindow, ReservationValidator};

use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateName(String),
    DuplicateCode(String),
    MissingField(&'static str),
    /// Laboratory missing or deactivated.
    LaboratoryUnavailable(Ulid),
    Conflict(Ulid),
    HasUpcomingReservations(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateName(name) => {
                write!(f, "a laboratory named {name:?} already exists")
            }
            EngineError::DuplicateCode(code) => {
                write!(f, "a laboratory with code {code:?} already exists")
            }
            EngineError::MissingField(field) => write!(f, "field {field} is required"),
            EngineError::LaboratoryUnavailable(id) => {
                write!(f, "laboratory not found or inactive: {id}")
            }
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::HasUpcomingReservations(id) => write!(
                f,
                "laboratory {id} has current or upcoming reservations and cannot be retired"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

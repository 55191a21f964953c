use ulid::Ulid;

/// Caller-facing failure classes. Every error the engine or the credential
/// service returns falls into exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed interval or missing/invalid field.
    Validation,
    NotFound,
    /// Authenticated, but the role or ownership check failed.
    Forbidden,
    /// Interval overlap, or a uniqueness clash.
    Conflict,
    /// Bad credentials, or a missing, expired or malformed session token.
    Authentication,
    /// Store unavailable or unexpected fault. Details are logged, not returned.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Invalid(&'static str),
    LimitExceeded(&'static str),
    RoomNotFound(Ulid),
    BookingNotFound(Ulid),
    /// Role gate denied the named operation.
    Forbidden(&'static str),
    /// The booking belongs to someone else.
    NotOwner(Ulid),
    /// Overlaps the booking with this id.
    Conflict(Ulid),
    UsernameTaken(String),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Invalid(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::RoomNotFound(_) | EngineError::BookingNotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden(_) | EngineError::NotOwner(_) => ErrorKind::Forbidden,
            EngineError::Conflict(_) | EngineError::UsernameTaken(_) => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Forbidden(op) => write!(f, "not permitted: {op}"),
            EngineError::NotOwner(id) => {
                write!(f, "reservation {id} belongs to another user")
            }
            EngineError::Conflict(id) => {
                write!(f, "room is not available for the requested hours (overlaps {id})")
            }
            EngineError::UsernameTaken(name) => write!(f, "username already taken: {name}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

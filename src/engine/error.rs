use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No free place, or the unit (or an ancestor) is unlisted.
    UnitUnavailable(Ulid),
    /// Another active hold already covers the unit.
    HoldConflict {
        unit_id: Ulid,
        hold_id: Ulid,
        expires_at: Ms,
    },
    /// The hold lapsed before it could be finalized or changed.
    HoldExpired(Ulid),
    /// An occupancy increment would overflow capacity. Means serialization was
    /// violated upstream.
    CapacityExceeded {
        unit_id: Ulid,
        capacity: u32,
    },
    NotAuthorized(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    NotLetable(Ulid),
    InvalidParent(Ulid),
    HasChildren(Ulid),
    InvalidTransition(&'static str),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnitUnavailable(id) => write!(f, "unit {id} is not available"),
            EngineError::HoldConflict {
                unit_id,
                hold_id,
                expires_at,
            } => write!(
                f,
                "unit {unit_id} is currently being reserved (hold {hold_id} until {expires_at})"
            ),
            EngineError::HoldExpired(id) => {
                write!(f, "hold {id} has lapsed, please start again")
            }
            EngineError::CapacityExceeded { unit_id, capacity } => {
                write!(f, "capacity {capacity} of unit {unit_id} exceeded")
            }
            EngineError::NotAuthorized(msg) => write!(f, "not authorized: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NotLetable(id) => write!(f, "unit {id} cannot be reserved"),
            EngineError::InvalidParent(id) => write!(f, "invalid parent for unit {id}"),
            EngineError::HasChildren(id) => {
                write!(f, "cannot delete unit {id}: has children")
            }
            EngineError::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

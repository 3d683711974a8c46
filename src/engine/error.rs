use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{DATE_FORMAT, Room, TimeRange};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The candidate overlaps `id`, which occupies `existing` in `room` on `date`.
    Conflict {
        id: Ulid,
        room: Room,
        date: NaiveDate,
        existing: TimeRange,
    },
    InvalidPeriodSelector(&'static str),
    InvalidBooking(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "booking already exists: {id}"),
            EngineError::Conflict {
                id,
                room,
                date,
                existing,
            } => write!(
                f,
                "time conflict: room {room} is already booked on {} from {existing} (booking {id})",
                date.format(DATE_FORMAT)
            ),
            EngineError::InvalidPeriodSelector(msg) => write!(f, "invalid period: {msg}"),
            EngineError::InvalidBooking(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

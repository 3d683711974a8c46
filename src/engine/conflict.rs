use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// First record in `existing` that collides with the candidate slot, if any.
///
/// Records with id `exclude` are ignored so an edit never collides with itself.
/// Ranges are half-open: a booking ending at 10:00 and one starting at 10:00
/// share the room without conflict.
pub fn find_conflict<'a, I>(
    date: NaiveDate,
    room: Room,
    time: &TimeRange,
    existing: I,
    exclude: Option<Ulid>,
) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    existing.into_iter().find(|b| {
        Some(b.id) != exclude && b.date == date && b.room == room && b.time.overlaps(time)
    })
}

pub fn conflicts<'a, I>(
    date: NaiveDate,
    room: Room,
    time: &TimeRange,
    existing: I,
    exclude: Option<Ulid>,
) -> bool
where
    I: IntoIterator<Item = &'a Booking>,
{
    find_conflict(date, room, time, existing, exclude).is_some()
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    draft: &BookingDraft,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(draft.date, rs.room, &draft.time, rs.on_date(draft.date), exclude) {
        Some(existing) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict {
                id: existing.id,
                room: existing.room,
                date: existing.date,
                existing: existing.time,
            })
        }
        None => Ok(()),
    }
}

/// Normalize and bound-check user input before it reaches a room lock.
pub(crate) fn validate_draft(draft: &mut BookingDraft) -> Result<(), EngineError> {
    let trimmed = draft.name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidBooking("requester name is required"));
    }
    if trimmed.len() != draft.name.len() {
        draft.name = trimmed.to_string();
    }
    if draft.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("requester name too long"));
    }
    if TimeRange::try_new(draft.time.start, draft.time.end).is_none() {
        return Err(EngineError::InvalidBooking("start time must be before end time"));
    }
    if draft.description.as_deref().is_some_and(|d| d.trim().is_empty()) {
        draft.description = None;
    }
    if let Some(ref d) = draft.description
        && d.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("description too long"));
        }
    Ok(())
}

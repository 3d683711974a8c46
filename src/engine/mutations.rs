use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_draft};
use super::period::resolve_period;
use super::{apply_to_room, Engine, EngineError, WalCommand};

/// Overlay `patch` on the current record: every provided field replaces the old one.
fn merge_patch(existing: &Booking, patch: BookingPatch) -> BookingDraft {
    BookingDraft {
        date: patch.date.unwrap_or(existing.date),
        name: patch.name.unwrap_or_else(|| existing.name.clone()),
        room: patch.room.unwrap_or(existing.room),
        time: TimeRange {
            start: patch.start.unwrap_or(existing.time.start),
            end: patch.end.unwrap_or(existing.time.end),
        },
        description: patch
            .description
            .unwrap_or_else(|| existing.description.clone()),
    }
}

fn find_in(rs: &RoomState, id: Ulid) -> Result<&Booking, EngineError> {
    rs.bookings
        .iter()
        .find(|b| b.id == id)
        .ok_or(EngineError::NotFound(id))
}

impl Engine {
    pub async fn create_booking(
        &self,
        id: Ulid,
        mut draft: BookingDraft,
        owner: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_draft(&mut draft)?;

        let rs = self.get_room(draft.room);
        let mut guard = rs.write().await;
        check_no_conflict(&guard, &draft, None)?;

        // The index spans all rooms: claim the id before writing.
        match self.booking_to_room.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(draft.room);
            }
        }
        if self.booking_count() > MAX_BOOKINGS {
            self.booking_to_room.remove(&id);
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let booking = Booking::from_draft(id, draft, now_ms(), owner);
        let event = Event::BookingCreated { booking: booking.clone() };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.booking_to_room.remove(&id);
            return Err(e);
        }
        info!(
            "booking {id} created: {} on {} {}",
            booking.room,
            booking.date.format(DATE_FORMAT),
            booking.time
        );
        Ok(booking)
    }

    /// Replace the provided fields of a booking. The merged record is checked
    /// against its (possibly new) room, excluding itself.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        let current_room = self.room_of(&id).ok_or(EngineError::NotFound(id))?;
        let target_room = patch.room.unwrap_or(current_room);

        if target_room == current_room {
            let rs = self.get_room(current_room);
            let mut guard = rs.write().await;
            let existing = find_in(&guard, id)?.clone();
            if patch.is_empty() {
                return Ok(existing);
            }
            let mut draft = merge_patch(&existing, patch);
            validate_draft(&mut draft)?;
            check_no_conflict(&guard, &draft, Some(id))?;

            let booking = Booking::from_draft(id, draft, existing.created_at, existing.owner);
            let event = Event::BookingUpdated {
                booking: booking.clone(),
                previous_room: current_room,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!("booking {id} updated");
            return Ok(booking);
        }

        // Room move: lock both rooms in `Room` order to avoid deadlocks.
        let current_rs = self.get_room(current_room);
        let target_rs = self.get_room(target_room);
        let (mut current_guard, mut target_guard) = if current_room < target_room {
            let c = current_rs.write_owned().await;
            let t = target_rs.write_owned().await;
            (c, t)
        } else {
            let t = target_rs.write_owned().await;
            let c = current_rs.write_owned().await;
            (c, t)
        };

        let existing = find_in(&current_guard, id)?.clone();
        let mut draft = merge_patch(&existing, patch);
        validate_draft(&mut draft)?;
        check_no_conflict(&target_guard, &draft, Some(id))?;

        let booking = Booking::from_draft(id, draft, existing.created_at, existing.owner);
        let event = Event::BookingUpdated {
            booking: booking.clone(),
            previous_room: current_room,
        };
        self.wal_append(&event).await?;
        apply_to_room(&mut current_guard, &event, &self.booking_to_room);
        apply_to_room(&mut target_guard, &event, &self.booking_to_room);
        info!("booking {id} moved from {current_room} to {target_room}");
        Ok(booking)
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<Room, EngineError> {
        let (room, mut guard) = self.resolve_booking_write(&id).await?;
        find_in(&guard, id)?;
        let event = Event::BookingDeleted { id, room };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {id} deleted from {room}");
        Ok(room)
    }

    /// Remove every booking whose date falls inside the selected period.
    /// The selector is resolved before any lock is taken or anything is written.
    pub async fn purge_period(&self, selector: &PeriodSelector) -> Result<usize, EngineError> {
        let window = resolve_period(selector)?;

        // Fixed `Room::ALL` order.
        let mut guards = Vec::with_capacity(Room::COUNT);
        for rs in &self.rooms {
            guards.push(rs.clone().write_owned().await);
        }

        let count: usize = guards.iter().map(|g| g.in_window(&window).len()).sum();
        if count == 0 {
            return Ok(0);
        }

        let event = Event::BookingsPurged { window };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            apply_to_room(guard, &event, &self.booking_to_room);
        }
        metrics::gauge!(crate::observability::BOOKINGS_LIVE).set(self.booking_count() as f64);
        info!(
            "purged {count} bookings between {} and {}",
            window.start.format(DATE_FORMAT),
            window.end.format(DATE_FORMAT)
        );
        Ok(count)
    }

    /// Rewrite the WAL as one `BookingCreated` per live booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Read guards stay held until the swap so no append lands between
        // the snapshot and the rename.
        let mut guards = Vec::with_capacity(Room::COUNT);
        for rs in &self.rooms {
            guards.push(rs.clone().read_owned().await);
        }
        let events: Vec<Event> = guards
            .iter()
            .flat_map(|g| g.bookings.iter())
            .map(|b| Event::BookingCreated { booking: b.clone() })
            .collect();
        let live = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        info!("WAL compacted to {live} bookings");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

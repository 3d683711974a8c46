mod conflict;
mod error;
mod mutations;
mod period;
mod queries;

pub use conflict::{conflicts, find_conflict};
pub use error::EngineError;
pub use period::resolve_period;
pub use queries::BookingQuery;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch.
/// 5. Answer every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    /// One lock per room, indexed by `Room::index`.
    pub rooms: [SharedRoomState; Room::COUNT],
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → room holding it.
    pub(super) booking_to_room: DashMap<Ulid, Room>,
}

/// Apply an event to one room (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Room>) {
    match event {
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.room);
            rs.insert_booking(booking.clone());
        }
        Event::BookingUpdated { booking, previous_room } => {
            // Applied once per touched room: a move removes from the old
            // room and inserts into the new one.
            if *previous_room == rs.room {
                rs.remove_booking(booking.id);
            }
            if booking.room == rs.room {
                index.insert(booking.id, booking.room);
                rs.insert_booking(booking.clone());
            }
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        Event::BookingsPurged { window } => {
            for removed in rs.drain_window(window) {
                index.remove(&removed.id);
            }
        }
    }
}

/// Rooms an event touches. Purges touch every room.
fn event_rooms(event: &Event) -> Vec<Room> {
    match event {
        Event::BookingCreated { booking } => vec![booking.room],
        Event::BookingUpdated { booking, previous_room } if booking.room != *previous_room => {
            vec![*previous_room, booking.room]
        }
        Event::BookingUpdated { booking, .. } => vec![booking.room],
        Event::BookingDeleted { room, .. } => vec![*room],
        Event::BookingsPurged { .. } => Room::ALL.to_vec(),
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: Room::ALL.map(|room| Arc::new(RwLock::new(RoomState::new(room)))),
            wal_tx,
            booking_to_room: DashMap::new(),
        };

        // Replay: we're the sole owner of these Arcs, so try_write always
        // succeeds. Never blocking_write here, this may run inside a runtime.
        for event in &events {
            for room in event_rooms(event) {
                let mut guard = engine.rooms[room.index()]
                    .try_write()
                    .expect("replay: uncontended write");
                apply_to_room(&mut guard, event, &engine.booking_to_room);
            }
        }

        tracing::info!(
            "replayed {} events, {} live bookings",
            events.len(),
            engine.booking_to_room.len()
        );
        metrics::gauge!(crate::observability::BOOKINGS_LIVE).set(engine.booking_to_room.len() as f64);
        Ok(engine)
    }

    /// Write an event through the group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, room: Room) -> SharedRoomState {
        self.rooms[room.index()].clone()
    }

    pub fn room_of(&self, id: &Ulid) -> Option<Room> {
        self.booking_to_room.get(id).map(|e| *e.value())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_room.len()
    }

    /// WAL-append then apply to one room.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        metrics::gauge!(crate::observability::BOOKINGS_LIVE).set(self.booking_count() as f64);
        Ok(())
    }

    /// Lookup booking → room, acquire that room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &Ulid,
    ) -> Result<(Room, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room = self.room_of(id).ok_or(EngineError::NotFound(*id))?;
        let guard = self.get_room(room).write_owned().await;
        Ok((room, guard))
    }
}

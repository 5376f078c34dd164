mod availability;
mod conflict;
mod error;
mod memory;
mod mutations;
mod queries;

pub use availability::{free_spans, merge_overlapping, subtract_stays};
pub use conflict::conflicting;

use conflict::check_no_conflict;
pub use error::StoreError;
pub use memory::MemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn};

use crate::model::*;
use crate::wal::Wal;

/// Storage capability consumed by the repository and the workflow.
///
/// Two implementations: [`Engine`] (WAL-backed, per-room locks) and
/// [`MemoryStore`] (single mutex, for tests). Both guarantee that `book`
/// re-checks availability and inserts under the same lock, so two overlapping
/// bookings on one room can never both succeed.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn create_room(&self, name: String) -> Result<Room, StoreError>;
    /// All rooms ordered by id.
    async fn rooms(&self) -> Result<Vec<Room>, StoreError>;
    async fn room(&self, id: RoomId) -> Result<Room, StoreError>;

    async fn is_room_free(&self, room_id: RoomId, stay: Stay) -> Result<bool, StoreError>;
    /// Rooms with no restriction conflicting with `stay`, ordered by id.
    async fn free_rooms(&self, stay: Stay) -> Result<Vec<Room>, StoreError>;
    /// Restrictions on the room conflicting with `stay`, ordered by start date.
    async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        stay: Stay,
    ) -> Result<Vec<RoomRestriction>, StoreError>;

    /// Atomically insert the reservation and its restriction, or fail with
    /// `RoomUnavailable` leaving nothing behind.
    async fn book(&self, candidate: NewReservation) -> Result<ReservationId, StoreError>;
    async fn block_room(&self, room_id: RoomId, stay: Stay) -> Result<RestrictionId, StoreError>;
    async fn remove_block(&self, id: RestrictionId) -> Result<(), StoreError>;

    async fn reservation(&self, id: ReservationId) -> Result<Reservation, StoreError>;
    async fn reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError>;
    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError>;
    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError>;
    /// Delete the reservation and its restriction together.
    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError>;
}

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// fsync once for the whole batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compaction or stats see the log.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // Every caller in a failed batch is told it failed, so none of its bytes
    // may stay in the log for replay to resurrect.
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        error!("WAL rollback after failed batch: {e}");
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Monotonic id allocation; replay raises each counter past the ids it sees.
#[derive(Default)]
pub(super) struct IdSequence {
    room: AtomicI64,
    reservation: AtomicI64,
    restriction: AtomicI64,
}

impl IdSequence {
    pub(super) fn next_room(&self) -> RoomId {
        self.room.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(super) fn next_reservation(&self) -> ReservationId {
        self.reservation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(super) fn next_restriction(&self) -> RestrictionId {
        self.restriction.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn observe(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => {
                self.room.fetch_max(room.id, Ordering::SeqCst);
            }
            Event::ReservationBooked {
                reservation,
                restriction,
            } => {
                self.reservation.fetch_max(reservation.id, Ordering::SeqCst);
                self.restriction.fetch_max(restriction.id, Ordering::SeqCst);
            }
            Event::RoomBlocked { restriction } => {
                self.restriction.fetch_max(restriction.id, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

/// WAL-backed booking store.
///
/// Each room lives behind its own `RwLock`: availability reads take it shared,
/// every mutation of a room's restrictions takes it exclusively and holds it
/// across the conflict re-check, the log append and the in-memory apply.
/// Bookings on different rooms commit concurrently and share fsyncs through
/// the group-commit writer.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) reservations: DashMap<ReservationId, Reservation>,
    /// Reverse lookup: restriction id → room id.
    pub(super) restriction_to_room: DashMap<RestrictionId, RoomId>,
    pub(super) ids: IdSequence,
    /// Mutations hold it shared from log append to apply; compaction takes it
    /// exclusively so its snapshot never misses an in-flight commit.
    /// Always acquired before any room lock.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the log at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(
                "discarded torn tail of {} after {} valid entries ({} bytes)",
                wal_path.display(),
                replay.events.len(),
                replay.valid_len
            );
            Wal::discard_tail(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            restriction_to_room: DashMap::new(),
            ids: IdSequence::default(),
            commit_gate: RwLock::new(()),
            wal_tx,
        };

        // We're the sole owner of every lock here, so try_write always succeeds.
        // Never use blocking_write: this runs inside the runtime.
        for event in &replay.events {
            engine.ids.observe(event);
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                other => {
                    if let Some(entry) = engine.rooms.get(&other.room_id()) {
                        let rs = entry.value().clone();
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        if let Some(stay) = other.new_restriction_stay()
                            && let Err(e) = check_no_conflict(&guard, &stay)
                        {
                            warn!("replay: skipped conflicting entry: {e}");
                            continue;
                        }
                        engine.apply(&mut guard, other);
                    }
                }
            }
        }

        info!(
            "replayed {} events: {} rooms, {} reservations",
            replay.events.len(),
            engine.rooms.len(),
            engine.reservations.len()
        );
        Ok(engine)
    }

    /// Apply a durable event to memory. Caller holds the room's write lock.
    /// The restriction is inserted before the reservation becomes listable.
    pub(super) fn apply(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::ReservationBooked {
                reservation,
                restriction,
            } => {
                rs.insert_restriction(restriction.clone());
                self.restriction_to_room
                    .insert(restriction.id, restriction.room_id);
                self.reservations
                    .insert(reservation.id, reservation.clone());
            }
            Event::GuestDetailsUpdated {
                id,
                guest,
                updated_at,
                ..
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.guest = guest.clone();
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationProcessed {
                id,
                processed,
                updated_at,
                ..
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.processed = *processed;
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                for restriction_id in rs.remove_for_reservation(*id) {
                    self.restriction_to_room.remove(&restriction_id);
                }
                self.reservations.remove(id);
            }
            Event::RoomBlocked { restriction } => {
                rs.insert_restriction(restriction.clone());
                self.restriction_to_room
                    .insert(restriction.id, restriction.room_id);
            }
            Event::BlockRemoved { id, .. } => {
                rs.remove_restriction(*id);
                self.restriction_to_room.remove(id);
            }
            // Room creation is handled at the DashMap level.
            Event::RoomCreated { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// Append then apply. Nothing reaches memory unless the append is durable.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        self.apply(rs, event);
        Ok(())
    }

    pub(super) fn get_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Room ids in ascending order, for reproducible listings.
    pub(super) fn sorted_room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Lookup reservation → room, acquire the room's write lock, then confirm
    /// the reservation still exists (it may have been deleted while we waited).
    pub(super) async fn resolve_reservation_write(
        &self,
        id: ReservationId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RoomState>, StoreError> {
        let room_id = self
            .reservations
            .get(&id)
            .map(|r| r.room_id)
            .ok_or(StoreError::ReservationNotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = rs.write_owned().await;
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::ReservationNotFound(id));
        }
        Ok(guard)
    }
}

#[async_trait]
impl BookingStore for Engine {
    async fn create_room(&self, name: String) -> Result<Room, StoreError> {
        Engine::create_room(self, name).await
    }

    async fn rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.list_rooms().await)
    }

    async fn room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.get_room_info(id).await
    }

    async fn is_room_free(&self, room_id: RoomId, stay: Stay) -> Result<bool, StoreError> {
        Engine::is_room_free(self, room_id, stay).await
    }

    async fn free_rooms(&self, stay: Stay) -> Result<Vec<Room>, StoreError> {
        Engine::free_rooms(self, stay).await
    }

    async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        stay: Stay,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        Engine::restrictions_for_room(self, room_id, stay).await
    }

    async fn book(&self, candidate: NewReservation) -> Result<ReservationId, StoreError> {
        Engine::book(self, candidate).await
    }

    async fn block_room(&self, room_id: RoomId, stay: Stay) -> Result<RestrictionId, StoreError> {
        Engine::block_room(self, room_id, stay).await
    }

    async fn remove_block(&self, id: RestrictionId) -> Result<(), StoreError> {
        Engine::remove_block(self, id).await
    }

    async fn reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.get_reservation(id)
    }

    async fn reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.list_reservations(filter))
    }

    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError> {
        Engine::update_guest(self, id, guest).await
    }

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError> {
        Engine::set_processed(self, id, processed).await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        Engine::delete_reservation(self, id).await
    }
}

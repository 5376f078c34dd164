use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    conflicting, validate_guest, validate_room_name, validate_stay, validate_window,
};
use super::{BookingStore, StoreError};

#[derive(Clone, Default)]
struct Tables {
    rooms: BTreeMap<RoomId, Room>,
    reservations: BTreeMap<ReservationId, Reservation>,
    restrictions: BTreeMap<RestrictionId, RoomRestriction>,
    last_room: RoomId,
    last_reservation: ReservationId,
    last_restriction: RestrictionId,
}

impl Tables {
    fn room_restrictions(&self, room_id: RoomId) -> impl Iterator<Item = &RoomRestriction> {
        self.restrictions
            .values()
            .filter(move |r| r.room_id == room_id)
    }

    fn require_room(&self, id: RoomId) -> Result<&Room, StoreError> {
        self.rooms.get(&id).ok_or(StoreError::RoomNotFound(id))
    }

    fn require_reservation(&mut self, id: ReservationId) -> Result<&mut Reservation, StoreError> {
        self.reservations
            .get_mut(&id)
            .ok_or(StoreError::ReservationNotFound(id))
    }
}

/// Single-mutex store with no persistence.
///
/// Every mutation runs against a copy of the tables that replaces the live
/// ones only if the whole closure succeeds, which is what lets tests inject
/// a failure halfway through a booking and observe that nothing was kept.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_restriction_inserts: AtomicBool,
    stall_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the restriction insert inside `book` and `block_room` fail.
    pub fn fail_restriction_inserts(&self, fail: bool) {
        self.fail_restriction_inserts.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `stall`, or stop delaying with `None`.
    pub fn stall_for(&self, stall: Option<Duration>) {
        let ms = stall.map_or(0, |d| d.as_millis() as u64);
        self.stall_ms.store(ms, Ordering::SeqCst);
    }

    async fn stall(&self) {
        let ms = self.stall_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        self.stall().await;
        let tables = self.tables.lock().await;
        f(&tables)
    }

    async fn unit_of_work<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.stall().await;
        let mut tables = self.tables.lock().await;
        let mut draft = tables.clone();
        let out = f(&mut draft)?;
        *tables = draft;
        Ok(out)
    }

    fn insert_restriction(
        &self,
        tables: &mut Tables,
        room_id: RoomId,
        kind: RestrictionKind,
        reservation_id: Option<ReservationId>,
        stay: Stay,
    ) -> Result<RestrictionId, StoreError> {
        if self.fail_restriction_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("restriction insert failed".into()));
        }
        if tables.room_restrictions(room_id).count() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }
        tables.last_restriction += 1;
        let now = Utc::now();
        let restriction = RoomRestriction {
            id: tables.last_restriction,
            room_id,
            kind,
            reservation_id,
            stay,
            created_at: now,
            updated_at: now,
        };
        tables.restrictions.insert(restriction.id, restriction);
        Ok(tables.last_restriction)
    }
}

fn check_free(tables: &Tables, room_id: RoomId, stay: &Stay) -> Result<(), StoreError> {
    match conflicting(tables.room_restrictions(room_id), stay) {
        Some(r) => Err(StoreError::RoomUnavailable {
            room_id,
            conflicting: r.id,
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn create_room(&self, name: String) -> Result<Room, StoreError> {
        validate_room_name(&name)?;
        self.unit_of_work(|t| {
            if t.rooms.len() >= MAX_ROOMS {
                return Err(StoreError::LimitExceeded("too many rooms"));
            }
            t.last_room += 1;
            let now = Utc::now();
            let room = Room {
                id: t.last_room,
                name,
                created_at: now,
                updated_at: now,
            };
            t.rooms.insert(room.id, room.clone());
            Ok(room)
        })
        .await
    }

    async fn rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.read(|t| Ok(t.rooms.values().cloned().collect())).await
    }

    async fn room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.read(|t| t.require_room(id).cloned()).await
    }

    async fn is_room_free(&self, room_id: RoomId, stay: Stay) -> Result<bool, StoreError> {
        validate_window(&stay)?;
        self.read(|t| {
            t.require_room(room_id)?;
            Ok(conflicting(t.room_restrictions(room_id), &stay).is_none())
        })
        .await
    }

    async fn free_rooms(&self, stay: Stay) -> Result<Vec<Room>, StoreError> {
        validate_window(&stay)?;
        self.read(|t| {
            Ok(t
                .rooms
                .values()
                .filter(|room| conflicting(t.room_restrictions(room.id), &stay).is_none())
                .cloned()
                .collect())
        })
        .await
    }

    async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        stay: Stay,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        validate_window(&stay)?;
        self.read(|t| {
            t.require_room(room_id)?;
            let mut list: Vec<RoomRestriction> = t
                .room_restrictions(room_id)
                .filter(|r| r.stay.overlaps(&stay))
                .cloned()
                .collect();
            list.sort_by_key(|r| (r.stay.start, r.id));
            Ok(list)
        })
        .await
    }

    async fn book(&self, candidate: NewReservation) -> Result<ReservationId, StoreError> {
        validate_stay(&candidate.stay)?;
        validate_guest(&candidate.guest)?;
        self.unit_of_work(|t| {
            t.require_room(candidate.room_id)?;
            check_free(t, candidate.room_id, &candidate.stay)?;

            t.last_reservation += 1;
            let now = Utc::now();
            let reservation = Reservation {
                id: t.last_reservation,
                room_id: candidate.room_id,
                stay: candidate.stay,
                guest: candidate.guest,
                processed: false,
                created_at: now,
                updated_at: now,
            };
            let id = reservation.id;
            t.reservations.insert(id, reservation);
            self.insert_restriction(
                t,
                candidate.room_id,
                RestrictionKind::Reservation,
                Some(id),
                candidate.stay,
            )?;
            Ok(id)
        })
        .await
    }

    async fn block_room(&self, room_id: RoomId, stay: Stay) -> Result<RestrictionId, StoreError> {
        validate_window(&stay)?;
        self.unit_of_work(|t| {
            t.require_room(room_id)?;
            check_free(t, room_id, &stay)?;
            self.insert_restriction(t, room_id, RestrictionKind::OwnerBlock, None, stay)
        })
        .await
    }

    async fn remove_block(&self, id: RestrictionId) -> Result<(), StoreError> {
        self.unit_of_work(|t| {
            let restriction = t
                .restrictions
                .get(&id)
                .ok_or(StoreError::RestrictionNotFound(id))?;
            if restriction.kind == RestrictionKind::Reservation {
                return Err(StoreError::HeldByReservation(id));
            }
            t.restrictions.remove(&id);
            Ok(())
        })
        .await
    }

    async fn reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.read(|t| {
            t.reservations
                .get(&id)
                .cloned()
                .ok_or(StoreError::ReservationNotFound(id))
        })
        .await
    }

    async fn reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        self.read(|t| {
            Ok(t
                .reservations
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError> {
        validate_guest(&guest)?;
        self.unit_of_work(|t| {
            let reservation = t.require_reservation(id)?;
            reservation.guest = guest;
            reservation.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError> {
        self.unit_of_work(|t| {
            let reservation = t.require_reservation(id)?;
            reservation.processed = processed;
            reservation.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        self.unit_of_work(|t| {
            t.reservations
                .remove(&id)
                .ok_or(StoreError::ReservationNotFound(id))?;
            t.restrictions.retain(|_, r| r.reservation_id != Some(id));
            Ok(())
        })
        .await
    }
}

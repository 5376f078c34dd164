use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, RwLock};

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_no_conflict, validate_guest, validate_room_name, validate_stay, validate_window,
};
use super::{Engine, StoreError, WalCommand};

impl Engine {
    pub async fn create_room(&self, name: String) -> Result<Room, StoreError> {
        validate_room_name(&name)?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::LimitExceeded("too many rooms"));
        }

        let _gate = self.commit_gate.read().await;
        let now = Utc::now();
        let room = Room {
            id: self.ids.next_room(),
            name,
            created_at: now,
            updated_at: now,
        };
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        Ok(room)
    }

    /// Re-check and insert under the room's write lock. The reservation and
    /// its restriction travel in one log entry.
    pub async fn book(&self, candidate: NewReservation) -> Result<ReservationId, StoreError> {
        validate_stay(&candidate.stay)?;
        validate_guest(&candidate.guest)?;

        let _gate = self.commit_gate.read().await;
        let rs = self
            .get_room(&candidate.room_id)
            .ok_or(StoreError::RoomNotFound(candidate.room_id))?;
        let mut guard = rs.write().await;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }

        check_no_conflict(&guard, &candidate.stay)?;

        let now = Utc::now();
        let reservation = Reservation {
            id: self.ids.next_reservation(),
            room_id: candidate.room_id,
            stay: candidate.stay,
            guest: candidate.guest,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        let restriction = RoomRestriction {
            id: self.ids.next_restriction(),
            room_id: candidate.room_id,
            kind: RestrictionKind::Reservation,
            reservation_id: Some(reservation.id),
            stay: candidate.stay,
            created_at: now,
            updated_at: now,
        };
        let id = reservation.id;
        let event = Event::ReservationBooked {
            reservation,
            restriction,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn block_room(&self, room_id: RoomId, stay: Stay) -> Result<RestrictionId, StoreError> {
        validate_window(&stay)?;

        let _gate = self.commit_gate.read().await;
        let rs = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }

        check_no_conflict(&guard, &stay)?;

        let now = Utc::now();
        let restriction = RoomRestriction {
            id: self.ids.next_restriction(),
            room_id,
            kind: RestrictionKind::OwnerBlock,
            reservation_id: None,
            stay,
            created_at: now,
            updated_at: now,
        };
        let id = restriction.id;
        let event = Event::RoomBlocked { restriction };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn remove_block(&self, id: RestrictionId) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let room_id = self
            .restriction_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::RestrictionNotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let mut guard = rs.write().await;

        let kind = guard
            .restrictions
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.kind)
            .ok_or(StoreError::RestrictionNotFound(id))?;
        if kind == RestrictionKind::Reservation {
            return Err(StoreError::HeldByReservation(id));
        }

        let event = Event::BlockRemoved { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn update_guest(
        &self,
        id: ReservationId,
        guest: GuestDetails,
    ) -> Result<(), StoreError> {
        validate_guest(&guest)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_reservation_write(id).await?;
        let event = Event::GuestDetailsUpdated {
            id,
            room_id: guard.room.id,
            guest,
            updated_at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_reservation_write(id).await?;
        let event = Event::ReservationProcessed {
            id,
            room_id: guard.room.id,
            processed,
            updated_at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_reservation_write(id).await?;
        let event = Event::ReservationDeleted {
            id,
            room_id: guard.room.id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Number of WAL appends since the last compaction.
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

    /// Rewrite the log as the minimal event set that rebuilds current state.
    /// Holds the commit gate exclusively, so no mutation is between its log
    /// append and its apply while the snapshot is taken and swapped in.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for room_id in self.sorted_room_ids() {
            let Some(rs) = self.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            for restriction in &guard.restrictions {
                match (restriction.kind, restriction.reservation_id) {
                    (RestrictionKind::Reservation, Some(res_id)) => {
                        let Some(reservation) = self.reservations.get(&res_id) else {
                            continue;
                        };
                        events.push(Event::ReservationBooked {
                            reservation: reservation.value().clone(),
                            restriction: restriction.clone(),
                        });
                    }
                    _ => events.push(Event::RoomBlocked {
                        restriction: restriction.clone(),
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }
}

use crate::model::*;

use super::conflict::{conflicting, validate_window};
use super::{Engine, StoreError};

impl Engine {
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for id in self.sorted_room_ids() {
            if let Some(rs) = self.get_room(&id) {
                rooms.push(rs.read().await.room.clone());
            }
        }
        rooms
    }

    pub async fn get_room_info(&self, id: RoomId) -> Result<Room, StoreError> {
        let rs = self.get_room(&id).ok_or(StoreError::RoomNotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn is_room_free(&self, room_id: RoomId, stay: Stay) -> Result<bool, StoreError> {
        validate_window(&stay)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(conflicting(guard.overlapping(&stay), &stay).is_none())
    }

    /// Each room is checked under its own read lock; the answer is advisory
    /// until `book` re-checks under the write lock.
    pub async fn free_rooms(&self, stay: Stay) -> Result<Vec<Room>, StoreError> {
        validate_window(&stay)?;
        let mut free = Vec::new();
        for id in self.sorted_room_ids() {
            let Some(rs) = self.get_room(&id) else {
                continue;
            };
            let guard = rs.read().await;
            if conflicting(guard.overlapping(&stay), &stay).is_none() {
                free.push(guard.room.clone());
            }
        }
        Ok(free)
    }

    pub async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        stay: Stay,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        validate_window(&stay)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.overlapping(&stay).cloned().collect())
    }

    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::ReservationNotFound(id))
    }

    pub fn list_reservations(&self, filter: ReservationFilter) -> Vec<Reservation> {
        let mut list: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        list.sort_unstable_by_key(|r| r.id);
        list
    }
}

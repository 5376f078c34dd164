use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::engine::{BookingStore, StoreError};
use crate::model::*;
use crate::observability::{status_label, STORE_CALLS_TOTAL, STORE_CALL_DURATION_SECONDS};

/// The only path from handlers and the workflow to storage.
///
/// Every call is bounded by the storage timeout. A call that runs out of time
/// fails with `StoreError::Timeout` and is never retried here.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn BookingStore>,
    timeout: Duration,
}

impl Repository {
    pub fn new(store: Arc<dyn BookingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(StoreError::Timeout(op)),
        };

        metrics::counter!(STORE_CALLS_TOTAL, "op" => op, "status" => status_label(&result))
            .increment(1);
        metrics::histogram!(STORE_CALL_DURATION_SECONDS, "op" => op)
            .record(start.elapsed().as_secs_f64());
        if let Err(e) = &result
            && e.is_storage_failure()
        {
            warn!(op, "storage call failed: {e}");
        }
        result
    }

    pub async fn rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.call("rooms", self.store.rooms()).await
    }

    pub async fn room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.call("room", self.store.room(id)).await
    }

    pub async fn create_room(&self, name: String) -> Result<Room, StoreError> {
        self.call("create_room", self.store.create_room(name)).await
    }

    pub async fn is_room_free(&self, room_id: RoomId, stay: Stay) -> Result<bool, StoreError> {
        self.call("is_room_free", self.store.is_room_free(room_id, stay))
            .await
    }

    pub async fn free_rooms(&self, stay: Stay) -> Result<Vec<Room>, StoreError> {
        self.call("free_rooms", self.store.free_rooms(stay)).await
    }

    pub async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        stay: Stay,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        self.call(
            "restrictions_for_room",
            self.store.restrictions_for_room(room_id, stay),
        )
        .await
    }

    /// The commit runs on its own task: if the caller goes away or the timeout
    /// fires, the booking still either lands whole or not at all.
    pub async fn book(&self, candidate: NewReservation) -> Result<ReservationId, StoreError> {
        let store = self.store.clone();
        let task = tokio::spawn(async move { store.book(candidate).await });
        self.call("book", async move {
            task.await
                .map_err(|e| StoreError::Backend(format!("booking task failed: {e}")))?
        })
        .await
    }

    pub async fn block_room(&self, room_id: RoomId, stay: Stay) -> Result<RestrictionId, StoreError> {
        self.call("block_room", self.store.block_room(room_id, stay))
            .await
    }

    pub async fn remove_block(&self, id: RestrictionId) -> Result<(), StoreError> {
        self.call("remove_block", self.store.remove_block(id)).await
    }

    pub async fn reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.call("reservation", self.store.reservation(id)).await
    }

    pub async fn reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.call("reservations", self.store.reservations(filter))
            .await
    }

    pub async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError> {
        self.call("update_guest", self.store.update_guest(id, guest))
            .await
    }

    pub async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError> {
        self.call("set_processed", self.store.set_processed(id, processed))
            .await
    }

    pub async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        self.call("delete_reservation", self.store.delete_reservation(id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryStore;
    use chrono::NaiveDate;

    fn june(start: u32, end: u32) -> Stay {
        Stay::new(
            NaiveDate::from_ymd_opt(2025, 6, start).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, end).unwrap(),
        )
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store.clone(), Duration::from_millis(20));
        repo.create_room("Suite".into()).await.unwrap();

        store.stall_for(Some(Duration::from_millis(200)));
        let err = repo.free_rooms(june(1, 3)).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout("free_rooms")));
        assert!(err.is_storage_failure());
    }

    #[tokio::test]
    async fn timed_out_booking_still_commits() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store.clone(), Duration::from_millis(20));
        let room = repo.create_room("Suite".into()).await.unwrap();

        store.stall_for(Some(Duration::from_millis(100)));
        let err = repo
            .book(NewReservation {
                room_id: room.id,
                stay: june(1, 3),
                guest: GuestDetails::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout("book")));

        tokio::time::sleep(Duration::from_millis(200)).await;
        store.stall_for(None);
        let held = store.reservations(ReservationFilter::All).await.unwrap();
        assert_eq!(held.len(), 1);
    }

    #[tokio::test]
    async fn rejections_pass_through_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store, Duration::from_secs(1));
        let err = repo.is_room_free(9, june(1, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::RoomNotFound(9)));
        assert!(!err.is_storage_failure());
    }
}

use crate::model::{ReservationId, RestrictionId, RoomId};

#[derive(Debug)]
pub enum StoreError {
    RoomNotFound(RoomId),
    ReservationNotFound(ReservationId),
    RestrictionNotFound(RestrictionId),
    /// The stay conflicts with an existing restriction on the room.
    RoomUnavailable {
        room_id: RoomId,
        conflicting: RestrictionId,
    },
    /// Reservation restrictions go away with their reservation, not on their own.
    HeldByReservation(RestrictionId),
    LimitExceeded(&'static str),
    /// The operation did not finish within the storage timeout.
    Timeout(&'static str),
    WalError(String),
    Backend(String),
}

impl StoreError {
    /// Backend failures: timeouts, log I/O, anything the caller cannot fix by
    /// changing its input. Never retried by the core.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::WalError(_) | StoreError::Backend(_)
        )
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            StoreError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::RestrictionNotFound(id) => write!(f, "restriction not found: {id}"),
            StoreError::RoomUnavailable {
                room_id,
                conflicting,
            } => write!(
                f,
                "room {room_id} unavailable: conflicts with restriction {conflicting}"
            ),
            StoreError::HeldByReservation(id) => write!(
                f,
                "restriction {id} belongs to a reservation; delete the reservation instead"
            ),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Timeout(op) => write!(f, "storage timeout during {op}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
            StoreError::Backend(e) => write!(f, "storage backend error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

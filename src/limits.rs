use std::time::Duration;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NAME_LEN: usize = 255;
pub const MAX_GUEST_FIELD_LEN: usize = 255;
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;

/// Longest stay a guest can book in one reservation.
pub const MAX_STAY_NIGHTS: i64 = 365;
/// Widest window an admin calendar or block query may cover.
pub const MAX_QUERY_NIGHTS: i64 = 2 * 366;

/// Dates outside [MIN_VALID_YEAR, MAX_VALID_YEAR] are rejected as input errors.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;

pub const FIRST_NAME_MIN_LEN: usize = 3;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RoomId = i64;
pub type ReservationId = i64;
pub type RestrictionId = i64;
pub type UserId = i64;

/// Wire format for dates in forms, JSON and views.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open date range `[start, end)`: `start` is the check-in day and `end`
/// the checkout day, so a stay covers the nights `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "Stay start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Result<Self, StayError> {
        if start >= end {
            return Err(StayError::EndNotAfterStart { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a `start`/`end` pair of `YYYY-MM-DD` strings as submitted by a form.
    pub fn parse(start: &str, end: &str) -> Result<Self, StayError> {
        let start = parse_date("start", start)?;
        let end = parse_date("end", end)?;
        Self::try_new(start, end)
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// The conflict predicate: two stays on the same room conflict iff each
    /// starts before the other ends. Checkout day == checkin day is fine.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_night(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_stay(&self, other: &Stay) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, StayError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| StayError::Unparseable {
        field,
        raw: raw.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StayError {
    Unparseable { field: &'static str, raw: String },
    EndNotAfterStart { start: NaiveDate, end: NaiveDate },
}

impl std::fmt::Display for StayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StayError::Unparseable { field, raw } => {
                write!(f, "cannot parse {field} date {raw:?}, expected YYYY-MM-DD")
            }
            StayError::EndNotAfterStart { start, end } => {
                write!(f, "end date {end} must be after start date {start}")
            }
        }
    }
}

impl std::error::Error for StayError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a room is unavailable for a stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Held by a guest reservation.
    Reservation,
    /// Closed by the owner, no reservation attached.
    OwnerBlock,
}

impl RestrictionKind {
    pub fn code(self) -> i32 {
        match self {
            RestrictionKind::Reservation => 1,
            RestrictionKind::OwnerBlock => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RestrictionKind::Reservation => "reservation",
            RestrictionKind::OwnerBlock => "owner block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub kind: RestrictionKind,
    /// Weak link: owner blocks have none, and the restriction never outlives
    /// the delete of its reservation.
    pub reservation_id: Option<ReservationId>,
    pub stay: Stay,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// A validated booking candidate, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: RoomId,
    pub stay: Stay,
    pub guest: GuestDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub stay: Stay,
    pub guest: GuestDetails,
    /// Reviewed by staff.
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    /// Not yet processed by staff.
    New,
}

impl ReservationFilter {
    pub fn matches(self, reservation: &Reservation) -> bool {
        match self {
            ReservationFilter::All => true,
            ReservationFilter::New => !reservation.processed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Reservation restrictions and owner blocks, sorted by `stay.start`.
    pub restrictions: Vec<RoomRestriction>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
        }
    }

    /// Insert restriction maintaining sort order by stay.start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.stay.start, |r| r.stay.start)
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    /// Drop every restriction tied to `reservation_id`, returning their ids.
    pub fn remove_for_reservation(&mut self, reservation_id: ReservationId) -> Vec<RestrictionId> {
        let mut removed = Vec::new();
        self.restrictions.retain(|r| {
            if r.reservation_id == Some(reservation_id) {
                removed.push(r.id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Return only restrictions that conflict with `query`.
    /// Uses binary search to skip restrictions starting on or after `query.end`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.stay.start < query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.stay.end > query.start)
    }
}

/// Log record format. One record is one unit of work: a booking carries both
/// of its rows so they are replayed together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    ReservationBooked {
        reservation: Reservation,
        restriction: RoomRestriction,
    },
    GuestDetailsUpdated {
        id: ReservationId,
        room_id: RoomId,
        guest: GuestDetails,
        updated_at: DateTime<Utc>,
    },
    ReservationProcessed {
        id: ReservationId,
        room_id: RoomId,
        processed: bool,
        updated_at: DateTime<Utc>,
    },
    ReservationDeleted {
        id: ReservationId,
        room_id: RoomId,
    },
    RoomBlocked {
        restriction: RoomRestriction,
    },
    BlockRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
}

impl Event {
    pub fn room_id(&self) -> RoomId {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::ReservationBooked { reservation, .. } => reservation.room_id,
            Event::RoomBlocked { restriction } => restriction.room_id,
            Event::GuestDetailsUpdated { room_id, .. }
            | Event::ReservationProcessed { room_id, .. }
            | Event::ReservationDeleted { room_id, .. }
            | Event::BlockRemoved { room_id, .. } => *room_id,
        }
    }

    /// Nights the event takes on its room, if it adds a restriction.
    pub fn new_restriction_stay(&self) -> Option<Stay> {
        match self {
            Event::ReservationBooked { restriction, .. } | Event::RoomBlocked { restriction } => {
                Some(restriction.stay)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn stay(start: &str, end: &str) -> Stay {
        Stay::new(d(start), d(end))
    }

    fn restriction(id: RestrictionId, start: &str, end: &str) -> RoomRestriction {
        RoomRestriction {
            id,
            room_id: 1,
            kind: RestrictionKind::OwnerBlock,
            reservation_id: None,
            stay: stay(start, end),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: 1,
            name: "General's Quarters".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn stay_basics() {
        let s = stay("2025-01-01", "2025-01-05");
        assert_eq!(s.nights(), 4);
        assert!(s.contains_night(d("2025-01-01")));
        assert!(s.contains_night(d("2025-01-04")));
        assert!(!s.contains_night(d("2025-01-05"))); // checkout day
        assert_eq!(s.start_str(), "2025-01-01");
        assert_eq!(s.end_str(), "2025-01-05");
    }

    #[test]
    fn back_to_back_stays_do_not_overlap() {
        let a = stay("2025-01-01", "2025-01-05");
        let b = stay("2025-01-05", "2025-01-10");
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn overlap_matches_closed_open_predicate() {
        // Every pair of stays inside a two-week window.
        let base = d("2025-03-01");
        let day = |n: i64| base + chrono::Duration::days(n);
        for a1 in 0..14 {
            for a2 in (a1 + 1)..15 {
                for b1 in 0..14 {
                    for b2 in (b1 + 1)..15 {
                        let a = Stay::new(day(a1), day(a2));
                        let b = Stay::new(day(b1), day(b2));
                        assert_eq!(a.overlaps(&b), a1 < b2 && b1 < a2);
                        assert_eq!(a.overlaps(&b), b.overlaps(&a));
                    }
                }
            }
        }
    }

    #[test]
    fn stay_contains_stay() {
        let outer = stay("2025-06-01", "2025-06-30");
        assert!(outer.contains_stay(&stay("2025-06-10", "2025-06-12")));
        assert!(outer.contains_stay(&outer));
        assert!(!outer.contains_stay(&stay("2025-05-30", "2025-06-02")));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            Stay::parse("2025-13-01", "2025-12-02"),
            Err(StayError::Unparseable { field: "start", .. })
        ));
        assert!(matches!(
            Stay::parse("2025-06-01", "tomorrow"),
            Err(StayError::Unparseable { field: "end", .. })
        ));
        assert!(matches!(
            Stay::parse("2025-06-03", "2025-06-03"),
            Err(StayError::EndNotAfterStart { .. })
        ));
        assert!(matches!(
            Stay::parse("2025-06-03", "2025-06-01"),
            Err(StayError::EndNotAfterStart { .. })
        ));
    }

    #[test]
    fn parse_trims_whitespace() {
        let s = Stay::parse(" 2025-06-01", "2025-06-03 ").unwrap();
        assert_eq!(s, stay("2025-06-01", "2025-06-03"));
    }

    #[test]
    fn restriction_ordering() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2025-03-01", "2025-03-04"));
        rs.insert_restriction(restriction(2, "2025-01-01", "2025-01-02"));
        rs.insert_restriction(restriction(3, "2025-02-01", "2025-02-10"));
        let ids: Vec<_> = rs.restrictions.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2025-06-01", "2025-06-02"));
        rs.insert_restriction(restriction(2, "2025-06-02", "2025-06-04"));
        rs.insert_restriction(restriction(3, "2025-06-10", "2025-06-12"));

        let hits: Vec<_> = rs
            .overlapping(&stay("2025-06-01", "2025-06-03"))
            .map(|r| r.id)
            .collect();
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2025-06-01", "2025-06-05"));
        assert_eq!(rs.overlapping(&stay("2025-06-05", "2025-06-07")).count(), 0);
        assert_eq!(rs.overlapping(&stay("2025-05-28", "2025-06-01")).count(), 0);
    }

    #[test]
    fn overlapping_long_restriction_spanning_query() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2025-01-01", "2025-12-31"));
        assert_eq!(rs.overlapping(&stay("2025-06-01", "2025-06-02")).count(), 1);
    }

    #[test]
    fn remove_for_reservation_keeps_blocks() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2025-06-01", "2025-06-02"));
        let mut held = restriction(2, "2025-06-03", "2025-06-05");
        held.kind = RestrictionKind::Reservation;
        held.reservation_id = Some(40);
        rs.insert_restriction(held);

        assert_eq!(rs.remove_for_reservation(40), vec![2]);
        assert_eq!(rs.restrictions.len(), 1);
        assert_eq!(rs.restrictions[0].id, 1);
        assert!(rs.remove_for_reservation(40).is_empty());
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2025-06-01", "2025-06-02"));
        assert!(rs.remove_restriction(99).is_none());
        assert_eq!(rs.restrictions.len(), 1);
    }

    #[test]
    fn new_filter_skips_processed() {
        let mut r = Reservation {
            id: 1,
            room_id: 1,
            stay: stay("2025-06-01", "2025-06-02"),
            guest: GuestDetails::default(),
            processed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(ReservationFilter::New.matches(&r));
        r.processed = true;
        assert!(!ReservationFilter::New.matches(&r));
        assert!(ReservationFilter::All.matches(&r));
    }

    #[test]
    fn booked_event_serialization_roundtrip() {
        let now = Utc::now();
        let event = Event::ReservationBooked {
            reservation: Reservation {
                id: 7,
                room_id: 2,
                stay: stay("2025-06-01", "2025-06-03"),
                guest: GuestDetails {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: "ada@example.com".into(),
                    phone: String::new(),
                },
                processed: false,
                created_at: now,
                updated_at: now,
            },
            restriction: RoomRestriction {
                id: 9,
                room_id: 2,
                kind: RestrictionKind::Reservation,
                reservation_id: Some(7),
                stay: stay("2025-06-01", "2025-06-03"),
                created_at: now,
                updated_at: now,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.room_id(), 2);
    }
}

use chrono::Datelike;

use crate::limits::*;
use crate::model::*;

use super::StoreError;

/// First restriction on the room that conflicts with `stay`, if any.
/// Every availability answer in the crate goes through here.
pub fn conflicting<'a>(
    restrictions: impl IntoIterator<Item = &'a RoomRestriction>,
    stay: &Stay,
) -> Option<&'a RoomRestriction> {
    restrictions.into_iter().find(|r| r.stay.overlaps(stay))
}

pub(crate) fn check_no_conflict(rs: &RoomState, stay: &Stay) -> Result<(), StoreError> {
    match conflicting(rs.overlapping(stay), stay) {
        Some(r) => Err(StoreError::RoomUnavailable {
            room_id: rs.room.id,
            conflicting: r.id,
        }),
        None => Ok(()),
    }
}

fn validate_dates(stay: &Stay) -> Result<(), StoreError> {
    if stay.start.year() < MIN_VALID_YEAR || stay.end.year() > MAX_VALID_YEAR {
        return Err(StoreError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// Bounds for a stay a guest books.
pub(crate) fn validate_stay(stay: &Stay) -> Result<(), StoreError> {
    validate_dates(stay)?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(StoreError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Bounds for search, calendar and block windows.
pub(crate) fn validate_window(stay: &Stay) -> Result<(), StoreError> {
    validate_dates(stay)?;
    if stay.nights() > MAX_QUERY_NIGHTS {
        return Err(StoreError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_guest(guest: &GuestDetails) -> Result<(), StoreError> {
    let fields = [
        &guest.first_name,
        &guest.last_name,
        &guest.email,
        &guest.phone,
    ];
    if fields.iter().any(|f| f.len() > MAX_GUEST_FIELD_LEN) {
        return Err(StoreError::LimitExceeded("guest field too long"));
    }
    Ok(())
}

pub(crate) fn validate_room_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() || name.len() > MAX_ROOM_NAME_LEN {
        return Err(StoreError::LimitExceeded("room name empty or too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn held(id: RestrictionId, start: NaiveDate, end: NaiveDate) -> RoomRestriction {
        RoomRestriction {
            id,
            room_id: 1,
            kind: RestrictionKind::Reservation,
            reservation_id: Some(id),
            stay: Stay::new(start, end),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn finds_first_conflict() {
        let rs = [
            held(1, d(2025, 6, 1), d(2025, 6, 2)),
            held(2, d(2025, 6, 2), d(2025, 6, 4)),
        ];
        let query = Stay::new(d(2025, 6, 2), d(2025, 6, 3));
        assert_eq!(conflicting(&rs, &query).map(|r| r.id), Some(2));
    }

    #[test]
    fn checkout_day_is_free() {
        let rs = [held(1, d(2025, 1, 1), d(2025, 1, 5))];
        assert!(conflicting(&rs, &Stay::new(d(2025, 1, 5), d(2025, 1, 10))).is_none());
        assert!(conflicting(&rs, &Stay::new(d(2024, 12, 28), d(2025, 1, 1))).is_none());
        assert!(conflicting(&rs, &Stay::new(d(2024, 12, 28), d(2025, 1, 2))).is_some());
    }

    #[test]
    fn stay_limits() {
        assert!(validate_stay(&Stay::new(d(2025, 1, 1), d(2025, 12, 31))).is_ok());
        assert!(matches!(
            validate_stay(&Stay::new(d(2025, 1, 1), d(2026, 6, 1))),
            Err(StoreError::LimitExceeded("stay too long"))
        ));
        assert!(matches!(
            validate_stay(&Stay::new(d(1999, 12, 30), d(2000, 1, 2))),
            Err(StoreError::LimitExceeded("date out of range"))
        ));
        assert!(validate_window(&Stay::new(d(2025, 1, 1), d(2026, 6, 1))).is_ok());
    }

    #[test]
    fn guest_field_limit() {
        let mut guest = GuestDetails {
            first_name: "Ada".into(),
            ..Default::default()
        };
        assert!(validate_guest(&guest).is_ok());
        guest.phone = "9".repeat(MAX_GUEST_FIELD_LEN + 1);
        assert!(validate_guest(&guest).is_err());
    }

    #[test]
    fn room_name_rules() {
        assert!(validate_room_name("Major's Suite").is_ok());
        assert!(validate_room_name("   ").is_err());
        assert!(validate_room_name(&"x".repeat(MAX_ROOM_NAME_LEN + 1)).is_err());
    }
}

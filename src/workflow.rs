use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::engine::StoreError;
use crate::forms::{FormErrors, GuestForm};
use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, SEARCHES_TOTAL};
use crate::repository::Repository;
use crate::session::{SessionId, SessionStore};

/// Where a guest is in the search → select → details → booked flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Searching,
    RoomsOffered { stay: Stay, rooms: Vec<Room> },
    RoomSelected { stay: Stay, room: Room },
    /// Details validated, booking in flight.
    FormPending {
        stay: Stay,
        room: Room,
        draft: GuestDetails,
    },
    Booked(Confirmation),
    /// A storage failure ended the flow and dropped the selection.
    Failed,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Searching => "searching",
            Stage::RoomsOffered { .. } => "rooms_offered",
            Stage::RoomSelected { .. } => "room_selected",
            Stage::FormPending { .. } => "form_pending",
            Stage::Booked(_) => "booked",
            Stage::Failed => "failed",
        }
    }
}

/// The room and dates a guest is about to book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub room: Room,
    pub stay: Stay,
}

/// What the summary page shows after a successful booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub reservation_id: ReservationId,
    pub room: Room,
    pub stay: Stay,
    pub guest: GuestDetails,
}

#[derive(Debug)]
pub enum SearchOutcome {
    Offered { stay: Stay, rooms: Vec<Room> },
    NoAvailability,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// Field errors; nothing was sent to storage and the stage is unchanged.
    Invalid {
        errors: FormErrors,
        draft: GuestForm,
        selection: Selection,
    },
    Booked(ReservationId),
}

#[derive(Debug)]
pub enum WorkflowError {
    Input(String),
    RoomNotOffered(RoomId),
    /// Lost the race for the room; the guest is back at search.
    RoomUnavailable,
    SessionStateMissing,
    NothingToShow,
    /// The booking ran out of time; it may still have been recorded.
    OutcomeUnknown,
    Storage(StoreError),
}

impl WorkflowError {
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            WorkflowError::Storage(_) | WorkflowError::OutcomeUnknown
        )
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Input(msg) => write!(f, "{msg}"),
            WorkflowError::RoomNotOffered(id) => {
                write!(f, "room {id} was not offered for these dates")
            }
            WorkflowError::RoomUnavailable => {
                write!(f, "Sorry, this room was just booked for those dates")
            }
            WorkflowError::SessionStateMissing => {
                write!(f, "cannot get reservation from session")
            }
            WorkflowError::NothingToShow => write!(f, "can't get item from session"),
            WorkflowError::OutcomeUnknown => write!(
                f,
                "We could not confirm your reservation in time. Please contact us before booking again."
            ),
            WorkflowError::Storage(_) => write!(f, "Internal server error"),
        }
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkflowError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StayError> for WorkflowError {
    fn from(e: StayError) -> Self {
        WorkflowError::Input(e.to_string())
    }
}

/// Parse a guest's dates and reject stays longer than one booking may hold,
/// so no room is ever offered for dates that cannot be booked.
fn bookable_stay(start: &str, end: &str) -> Result<Stay, WorkflowError> {
    let stay = Stay::parse(start.trim(), end.trim())?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(WorkflowError::Input(format!(
            "a stay can be at most {MAX_STAY_NIGHTS} nights"
        )));
    }
    Ok(stay)
}

/// Drives one guest session through search and booking.
///
/// All storage goes through the injected [`Repository`]; all per-guest state
/// lives in the [`SessionStore`].
#[derive(Clone)]
pub struct ReservationWorkflow {
    repo: Repository,
    sessions: Arc<SessionStore>,
}

impl ReservationWorkflow {
    pub fn new(repo: Repository, sessions: Arc<SessionStore>) -> Self {
        Self { repo, sessions }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Map a store error to the workflow outcome and move the session on.
    fn store_failure(&self, session: SessionId, op: &'static str, e: StoreError) -> WorkflowError {
        match e {
            StoreError::RoomUnavailable {
                room_id,
                conflicting,
            } => {
                warn!(%session, "room {room_id} lost to restriction {conflicting} during {op}");
                self.sessions.set_stage(session, Stage::Searching);
                WorkflowError::RoomUnavailable
            }
            StoreError::LimitExceeded(msg) => {
                self.sessions.set_stage(session, Stage::Searching);
                WorkflowError::Input(msg.to_string())
            }
            StoreError::RoomNotFound(_) => {
                self.sessions.set_stage(session, Stage::Searching);
                WorkflowError::Input("cannot find room!".into())
            }
            StoreError::Timeout(_) if op == "book" => {
                error!(%session, "booking timed out; it may still commit");
                self.sessions.set_stage(session, Stage::Failed);
                WorkflowError::OutcomeUnknown
            }
            e => {
                error!(%session, "{op} failed: {e}");
                self.sessions.set_stage(session, Stage::Failed);
                WorkflowError::Storage(e)
            }
        }
    }

    pub async fn search(
        &self,
        session: SessionId,
        start: &str,
        end: &str,
    ) -> Result<SearchOutcome, WorkflowError> {
        let stay = bookable_stay(start, end)?;

        let previous = self.sessions.stage(session);
        if matches!(
            previous,
            Stage::RoomsOffered { .. } | Stage::RoomSelected { .. }
        ) {
            debug!(%session, "{} abandoned for a new search", previous.name());
        }

        let rooms = match self.repo.free_rooms(stay).await {
            Ok(rooms) => rooms,
            Err(e) => {
                metrics::counter!(SEARCHES_TOTAL, "outcome" => "failed").increment(1);
                return Err(self.store_failure(session, "free_rooms", e));
            }
        };

        if rooms.is_empty() {
            metrics::counter!(SEARCHES_TOTAL, "outcome" => "none").increment(1);
            self.sessions.set_stage(session, Stage::Searching);
            return Ok(SearchOutcome::NoAvailability);
        }

        metrics::counter!(SEARCHES_TOTAL, "outcome" => "offered").increment(1);
        self.sessions.set_stage(
            session,
            Stage::RoomsOffered {
                stay,
                rooms: rooms.clone(),
            },
        );
        Ok(SearchOutcome::Offered { stay, rooms })
    }

    /// Pick one of the rooms the last search offered.
    pub fn choose_room(&self, session: SessionId, room_id: RoomId) -> Result<Selection, WorkflowError> {
        let Stage::RoomsOffered { stay, rooms } = self.sessions.stage(session) else {
            return Err(WorkflowError::SessionStateMissing);
        };
        let room = rooms
            .into_iter()
            .find(|r| r.id == room_id)
            .ok_or(WorkflowError::RoomNotOffered(room_id))?;

        self.sessions.set_stage(
            session,
            Stage::RoomSelected {
                stay,
                room: room.clone(),
            },
        );
        Ok(Selection { room, stay })
    }

    /// Select a room and dates directly from a room page, skipping the search.
    /// Availability is checked again when the booking is made.
    pub async fn book_room(
        &self,
        session: SessionId,
        room_id: RoomId,
        start: &str,
        end: &str,
    ) -> Result<Selection, WorkflowError> {
        let stay = bookable_stay(start, end)?;
        let room = self
            .repo
            .room(room_id)
            .await
            .map_err(|e| self.store_failure(session, "room", e))?;

        self.sessions.set_stage(
            session,
            Stage::RoomSelected {
                stay,
                room: room.clone(),
            },
        );
        Ok(Selection { room, stay })
    }

    /// The selection the make-reservation form is for.
    pub fn reservation_form(&self, session: SessionId) -> Result<Selection, WorkflowError> {
        match self.sessions.stage(session) {
            Stage::RoomSelected { stay, room } => Ok(Selection { room, stay }),
            _ => Err(WorkflowError::SessionStateMissing),
        }
    }

    /// Validate the guest's details and, if they pass, book the selection.
    pub async fn submit(
        &self,
        session: SessionId,
        form: GuestForm,
    ) -> Result<SubmitOutcome, WorkflowError> {
        // Taking the stage makes a double submit see `Searching`.
        let (stay, room) = match self.sessions.take_stage(session) {
            Stage::RoomSelected { stay, room } => (stay, room),
            other => {
                self.sessions.set_stage(session, other);
                return Err(WorkflowError::SessionStateMissing);
            }
        };

        if let Err(errors) = form.check() {
            self.sessions.set_stage(
                session,
                Stage::RoomSelected {
                    stay,
                    room: room.clone(),
                },
            );
            return Ok(SubmitOutcome::Invalid {
                errors,
                draft: form,
                selection: Selection { room, stay },
            });
        }

        let guest = form.into_guest();
        self.sessions.set_stage(
            session,
            Stage::FormPending {
                stay,
                room: room.clone(),
                draft: guest.clone(),
            },
        );

        let candidate = NewReservation {
            room_id: room.id,
            stay,
            guest: guest.clone(),
        };
        match self.repo.book(candidate).await {
            Ok(reservation_id) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "booked").increment(1);
                info!(
                    "reservation {reservation_id} booked: room {} {}..{}",
                    room.id,
                    stay.start_str(),
                    stay.end_str()
                );
                self.sessions.set_stage(
                    session,
                    Stage::Booked(Confirmation {
                        reservation_id,
                        room,
                        stay,
                        guest,
                    }),
                );
                Ok(SubmitOutcome::Booked(reservation_id))
            }
            Err(e) => {
                let outcome = match e {
                    StoreError::RoomUnavailable { .. } => "unavailable",
                    StoreError::Timeout(_) => "unknown",
                    _ => "failed",
                };
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
                Err(self.store_failure(session, "book", e))
            }
        }
    }

    /// The confirmation of the booking just made. Shown once.
    pub fn summary(&self, session: SessionId) -> Result<Confirmation, WorkflowError> {
        match self.sessions.take_stage(session) {
            Stage::Booked(confirmation) => Ok(confirmation),
            other => {
                self.sessions.set_stage(session, other);
                Err(WorkflowError::NothingToShow)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::engine::{BookingStore, MemoryStore};

    async fn setup() -> (ReservationWorkflow, Arc<MemoryStore>, SessionId) {
        let store = Arc::new(MemoryStore::new());
        store.create_room("General's Quarters".into()).await.unwrap();
        store.create_room("Major's Suite".into()).await.unwrap();
        let repo = Repository::new(store.clone(), Duration::from_secs(1));
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let session = sessions.resume_or_create(None);
        (ReservationWorkflow::new(repo, sessions), store, session)
    }

    fn ada() -> GuestForm {
        GuestForm {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "555-0100".into(),
        }
    }

    fn june(start: u32, end: u32) -> Stay {
        Stay::new(
            chrono::NaiveDate::from_ymd_opt(2025, 6, start).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 6, end).unwrap(),
        )
    }

    #[tokio::test]
    async fn empty_calendar_offers_every_room() {
        let (wf, _store, session) = setup().await;
        let outcome = wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        let SearchOutcome::Offered { rooms, .. } = outcome else {
            panic!("expected rooms");
        };
        assert_eq!(rooms.len(), 2);
    }

    #[tokio::test]
    async fn search_skips_restricted_room() {
        let (wf, store, session) = setup().await;
        store.block_room(1, june(2, 4)).await.unwrap();

        let outcome = wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        let SearchOutcome::Offered { rooms, stay } = outcome else {
            panic!("expected rooms");
        };
        assert_eq!(rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(stay, june(1, 3));
        assert!(matches!(wf.sessions.stage(session), Stage::RoomsOffered { .. }));
    }

    #[tokio::test]
    async fn no_availability_returns_to_searching() {
        let (wf, store, session) = setup().await;
        store.block_room(1, june(1, 10)).await.unwrap();
        store.block_room(2, june(1, 10)).await.unwrap();

        let outcome = wf.search(session, "2025-06-02", "2025-06-03").await.unwrap();
        assert!(matches!(outcome, SearchOutcome::NoAvailability));
        assert_eq!(wf.sessions.stage(session), Stage::Searching);
    }

    #[tokio::test]
    async fn bad_dates_are_input_errors() {
        let (wf, _store, session) = setup().await;
        assert!(matches!(
            wf.search(session, "2025-06-03", "2025-06-01").await,
            Err(WorkflowError::Input(_))
        ));
        assert!(matches!(
            wf.search(session, "tomorrow", "2025-06-01").await,
            Err(WorkflowError::Input(_))
        ));
    }

    #[tokio::test]
    async fn choose_room_only_from_offer() {
        let (wf, store, session) = setup().await;
        assert!(matches!(
            wf.choose_room(session, 1),
            Err(WorkflowError::SessionStateMissing)
        ));

        store.block_room(1, june(1, 10)).await.unwrap();
        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        assert!(matches!(
            wf.choose_room(session, 1),
            Err(WorkflowError::RoomNotOffered(1))
        ));
        let selection = wf.choose_room(session, 2).unwrap();
        assert_eq!(selection.room.name, "Major's Suite");
        assert_eq!(wf.reservation_form(session).unwrap(), selection);
    }

    #[tokio::test]
    async fn blank_first_name_never_reaches_store() {
        let (wf, store, session) = setup().await;
        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        wf.choose_room(session, 1).unwrap();

        let form = GuestForm {
            first_name: String::new(),
            ..ada()
        };
        let outcome = wf.submit(session, form).await.unwrap();
        let SubmitOutcome::Invalid { errors, draft, .. } = outcome else {
            panic!("expected validation failure");
        };
        assert!(errors.has("first_name", "This field can't be blank"));
        assert_eq!(draft.last_name, "Lovelace");
        assert!(store.reservations(ReservationFilter::All).await.unwrap().is_empty());
        assert!(matches!(wf.sessions.stage(session), Stage::RoomSelected { .. }));
    }

    #[tokio::test]
    async fn booking_then_summary_once() {
        let (wf, store, session) = setup().await;
        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        wf.choose_room(session, 1).unwrap();

        let SubmitOutcome::Booked(id) = wf.submit(session, ada()).await.unwrap() else {
            panic!("expected booking");
        };
        assert!(!store.is_room_free(1, june(1, 3)).await.unwrap());

        let confirmation = wf.summary(session).unwrap();
        assert_eq!(confirmation.reservation_id, id);
        assert_eq!(confirmation.guest.first_name, "Ada");
        assert!(matches!(wf.summary(session), Err(WorkflowError::NothingToShow)));
    }

    #[tokio::test]
    async fn lost_race_sends_guest_back_to_search() {
        let (wf, store, session) = setup().await;
        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        wf.choose_room(session, 1).unwrap();

        // Someone else takes the room between selection and submit.
        store
            .book(NewReservation {
                room_id: 1,
                stay: june(2, 5),
                guest: ada().into_guest(),
            })
            .await
            .unwrap();

        let err = wf.submit(session, ada()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::RoomUnavailable));
        assert_eq!(wf.sessions.stage(session), Stage::Searching);
        assert_eq!(store.reservations(ReservationFilter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_clears_selection() {
        let (wf, store, session) = setup().await;
        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        wf.choose_room(session, 1).unwrap();

        store.fail_restriction_inserts(true);
        let err = wf.submit(session, ada()).await.unwrap_err();
        assert!(err.is_storage_failure());
        assert_eq!(err.to_string(), "Internal server error");
        assert_eq!(wf.sessions.stage(session), Stage::Failed);
        assert!(matches!(
            wf.reservation_form(session),
            Err(WorkflowError::SessionStateMissing)
        ));

        store.fail_restriction_inserts(false);
        assert!(store.reservations(ReservationFilter::All).await.unwrap().is_empty());
        assert!(store.is_room_free(1, june(1, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn double_submit_books_once() {
        let (wf, store, session) = setup().await;
        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        wf.choose_room(session, 1).unwrap();

        wf.submit(session, ada()).await.unwrap();
        assert!(matches!(
            wf.submit(session, ada()).await,
            Err(WorkflowError::SessionStateMissing)
        ));
        assert_eq!(store.reservations(ReservationFilter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_booking_returns_to_search() {
        let (wf, store, session) = setup().await;
        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        wf.choose_room(session, 1).unwrap();

        // Passes the form rules, fails the store's field limit.
        let form = GuestForm {
            first_name: "A".repeat(300),
            ..ada()
        };
        let err = wf.submit(session, form).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Input(_)));
        assert_eq!(wf.sessions.stage(session), Stage::Searching);
        assert!(store.reservations(ReservationFilter::All).await.unwrap().is_empty());

        // The guest can start over right away.
        assert!(matches!(
            wf.search(session, "2025-06-01", "2025-06-03").await,
            Ok(SearchOutcome::Offered { .. })
        ));
    }

    #[tokio::test]
    async fn stays_longer_than_a_booking_are_not_offered() {
        let (wf, _store, session) = setup().await;
        assert!(matches!(
            wf.search(session, "2025-01-01", "2026-02-01").await,
            Err(WorkflowError::Input(_))
        ));
        assert!(matches!(
            wf.book_room(session, 1, "2025-01-01", "2026-02-01").await,
            Err(WorkflowError::Input(_))
        ));
        assert!(matches!(
            wf.search(session, "2025-01-01", "2025-12-31").await,
            Ok(SearchOutcome::Offered { .. })
        ));
    }

    #[tokio::test]
    async fn timed_out_booking_reports_unknown_outcome() {
        let store = Arc::new(MemoryStore::new());
        store.create_room("General's Quarters".into()).await.unwrap();
        let repo = Repository::new(store.clone(), Duration::from_millis(50));
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let session = sessions.resume_or_create(None);
        let wf = ReservationWorkflow::new(repo, sessions);

        wf.search(session, "2025-06-01", "2025-06-03").await.unwrap();
        wf.choose_room(session, 1).unwrap();

        store.stall_for(Some(Duration::from_millis(200)));
        let err = wf.submit(session, ada()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::OutcomeUnknown));
        assert!(err.to_string().contains("contact us"));
        assert_eq!(wf.sessions.stage(session), Stage::Failed);

        // The booking the guest was unsure about did land.
        tokio::time::sleep(Duration::from_millis(400)).await;
        store.stall_for(None);
        assert_eq!(store.reservations(ReservationFilter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn book_room_selects_directly() {
        let (wf, _store, session) = setup().await;
        let selection = wf
            .book_room(session, 2, "2025-07-01", "2025-07-04")
            .await
            .unwrap();
        assert_eq!(selection.stay.nights(), 3);
        assert!(matches!(
            wf.book_room(session, 99, "2025-07-01", "2025-07-04").await,
            Err(WorkflowError::Input(_))
        ));
        assert_eq!(wf.sessions.stage(session), Stage::Searching);
    }
}

use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Form, Router};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::engine::{free_spans, StoreError};
use crate::forms::{GuestForm, SearchForm};
use crate::model::*;
use crate::session::SessionId;

use super::view::{server_error, View};
use super::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/reservations-new", get(new_reservations))
        .route("/reservations-all", get(all_reservations))
        .route("/reservations/{id}", get(show_reservation).post(update_reservation))
        .route("/process-reservation/{id}", post(process_reservation))
        .route("/delete-reservation/{id}", post(delete_reservation))
        .route("/reservations-calendar", get(calendar))
        .route("/rooms/{id}/blocks", post(add_block))
        .route("/blocks/{id}/delete", post(remove_block))
        .route_layer(middleware::from_fn_with_state(state, require_staff))
}

/// Staff-only gate. Anyone else goes to the login page.
async fn require_staff(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    request: Request,
    next: Next,
) -> Response {
    if state.sessions().user(session).is_none() {
        state.sessions().put_error(session, "Log in first!");
        return Redirect::to("/user/login").into_response();
    }
    next.run(request).await
}

/// Flash the outcome of a store mutation and go back to `to`.
fn after_mutation(
    state: &AppState,
    session: SessionId,
    result: Result<(), StoreError>,
    ok_msg: &str,
    to: &str,
) -> Response {
    match result {
        Ok(()) => state.sessions().put_flash(session, ok_msg),
        Err(e) if e.is_storage_failure() => {
            error!("admin change failed: {e}");
            state.sessions().put_error(session, "Internal server error");
        }
        Err(e) => state.sessions().put_error(session, e.to_string()),
    }
    Redirect::to(to).into_response()
}

async fn dashboard(State(state): State<AppState>, Extension(session): Extension<SessionId>) -> View {
    View::new("admin-dashboard").messages(state.sessions(), session)
}

async fn list_reservations(
    state: &AppState,
    session: SessionId,
    view: &'static str,
    filter: ReservationFilter,
) -> Response {
    match state.repo().reservations(filter).await {
        Ok(reservations) => View::new(view)
            .data(json!({ "reservations": reservations }))
            .messages(state.sessions(), session)
            .into_response(),
        Err(_) => server_error(),
    }
}

async fn new_reservations(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    list_reservations(&state, session, "admin-new-reservations", ReservationFilter::New).await
}

async fn all_reservations(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    list_reservations(&state, session, "admin-all-reservations", ReservationFilter::All).await
}

async fn show_reservation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(id): Path<ReservationId>,
) -> Response {
    let reservation = match state.repo().reservation(id).await {
        Ok(r) => r,
        Err(StoreError::ReservationNotFound(_)) => {
            state.sessions().put_error(session, "Reservation not found");
            return Redirect::to("/admin/reservations-all").into_response();
        }
        Err(_) => return server_error(),
    };
    let room = match state.repo().room(reservation.room_id).await {
        Ok(room) => room,
        Err(_) => return server_error(),
    };
    View::new("admin-reservations-show")
        .data(json!({
            "reservation": reservation,
            "room": room,
            "form": GuestForm::from(&reservation.guest),
        }))
        .messages(state.sessions(), session)
        .into_response()
}

async fn update_reservation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(id): Path<ReservationId>,
    Form(form): Form<GuestForm>,
) -> Response {
    if let Err(errors) = form.check() {
        return View::new("admin-reservations-show")
            .data(json!({ "reservation_id": id, "form": form }))
            .form_errors(errors)
            .into_response();
    }
    let result = state.repo().update_guest(id, form.into_guest()).await;
    if result.is_ok() {
        info!("reservation {id}: guest details updated");
    }
    after_mutation(&state, session, result, "Changes saved", "/admin/reservations-all")
}

async fn process_reservation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(id): Path<ReservationId>,
) -> Response {
    let result = state.repo().set_processed(id, true).await;
    after_mutation(
        &state,
        session,
        result,
        "Reservation marked as processed",
        "/admin/reservations-new",
    )
}

async fn delete_reservation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(id): Path<ReservationId>,
) -> Response {
    let result = state.repo().delete_reservation(id).await;
    if result.is_ok() {
        info!("reservation {id} deleted");
    }
    after_mutation(&state, session, result, "Reservation deleted", "/admin/reservations-all")
}

#[derive(Debug, Default, Deserialize)]
struct CalendarQuery {
    room_id: Option<RoomId>,
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Serialize)]
struct RoomCalendar {
    room: Room,
    restrictions: Vec<RoomRestriction>,
    free: Vec<Stay>,
}

/// The calendar month containing `today`.
fn month_of(today: NaiveDate) -> Stay {
    let start = today.with_day(1).unwrap_or(today);
    let end = start
        .checked_add_months(chrono::Months::new(1))
        .unwrap_or_else(|| start + chrono::Days::new(31));
    Stay::new(start, end)
}

/// Restrictions and free spans per room over a window (default: this month).
async fn calendar(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Query(q): Query<CalendarQuery>,
) -> Response {
    let window = match (q.start.as_deref(), q.end.as_deref()) {
        (Some(start), Some(end)) => match Stay::parse(start, end) {
            Ok(stay) => stay,
            Err(e) => {
                state.sessions().put_error(session, e.to_string());
                return Redirect::to("/admin/dashboard").into_response();
            }
        },
        _ => month_of(Utc::now().date_naive()),
    };

    let rooms = match q.room_id {
        Some(id) => state.repo().room(id).await.map(|r| vec![r]),
        None => state.repo().rooms().await,
    };
    let rooms = match rooms {
        Ok(rooms) => rooms,
        Err(StoreError::RoomNotFound(_)) => {
            state.sessions().put_error(session, "cannot find room!");
            return Redirect::to("/admin/dashboard").into_response();
        }
        Err(_) => return server_error(),
    };

    let mut calendar = Vec::with_capacity(rooms.len());
    for room in rooms {
        let restrictions = match state.repo().restrictions_for_room(room.id, window).await {
            Ok(r) => r,
            Err(e) if e.is_storage_failure() => return server_error(),
            Err(e) => {
                state.sessions().put_error(session, e.to_string());
                return Redirect::to("/admin/dashboard").into_response();
            }
        };
        let free = free_spans(&window, &restrictions);
        calendar.push(RoomCalendar {
            room,
            restrictions,
            free,
        });
    }

    View::new("admin-reservations-calendar")
        .data(json!({
            "start_date": window.start_str(),
            "end_date": window.end_str(),
            "rooms": calendar,
        }))
        .messages(state.sessions(), session)
        .into_response()
}

async fn add_block(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(room_id): Path<RoomId>,
    Form(form): Form<SearchForm>,
) -> Response {
    let back = "/admin/reservations-calendar";
    let stay = match form.stay() {
        Ok(stay) => stay,
        Err(e) => {
            state.sessions().put_error(session, e.to_string());
            return Redirect::to(back).into_response();
        }
    };
    let result = state.repo().block_room(room_id, stay).await.map(|id| {
        info!(
            "room {room_id} blocked {}..{} (restriction {id})",
            stay.start_str(),
            stay.end_str()
        );
    });
    after_mutation(&state, session, result, "Room blocked", back)
}

async fn remove_block(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(id): Path<RestrictionId>,
) -> Response {
    let result = state.repo().remove_block(id).await;
    after_mutation(
        &state,
        session,
        result,
        "Block removed",
        "/admin/reservations-calendar",
    )
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Form, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::engine::StoreError;
use crate::forms::{GuestForm, LoginForm, RoomCheckForm, SearchForm};
use crate::model::RoomId;
use crate::observability::AUTH_FAILURES_TOTAL;
use crate::session::SessionId;
use crate::workflow::{SearchOutcome, SubmitOutcome, WorkflowError};

use super::view::{server_error, View};
use super::{AppState, SessionRenewed};

/// Put the error on the session for the next page and redirect there.
fn redirect_with_error(
    state: &AppState,
    session: SessionId,
    msg: impl Into<String>,
    to: &str,
) -> Response {
    state.sessions().put_error(session, msg);
    Redirect::to(to).into_response()
}

pub async fn home(State(state): State<AppState>, Extension(session): Extension<SessionId>) -> View {
    View::new("home").messages(state.sessions(), session)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn rooms(State(state): State<AppState>, Extension(session): Extension<SessionId>) -> Response {
    match state.repo().rooms().await {
        Ok(rooms) => View::new("rooms")
            .data(json!({ "rooms": rooms }))
            .messages(state.sessions(), session)
            .into_response(),
        Err(_) => server_error(),
    }
}

pub async fn search_page(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> View {
    View::new("search-availability").messages(state.sessions(), session)
}

pub async fn post_search(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Form(form): Form<SearchForm>,
) -> Response {
    match state.workflow.search(session, &form.start, &form.end).await {
        Ok(SearchOutcome::Offered { stay, rooms }) => View::new("choose-room")
            .data(json!({
                "rooms": rooms,
                "start_date": stay.start_str(),
                "end_date": stay.end_str(),
            }))
            .messages(state.sessions(), session)
            .into_response(),
        Ok(SearchOutcome::NoAvailability) => {
            redirect_with_error(&state, session, "No availability", "/search-availability")
        }
        Err(WorkflowError::Storage(_)) => {
            redirect_with_error(&state, session, "cannot search for availability!", "/")
        }
        Err(e) => redirect_with_error(&state, session, e.to_string(), "/search-availability"),
    }
}

#[derive(Debug, Serialize)]
pub struct AvailabilityJson {
    pub ok: bool,
    pub message: String,
    pub room_id: RoomId,
    pub start_date: String,
    pub end_date: String,
}

/// Single-room check used by the room pages. Always answers in JSON.
pub async fn availability_json(
    State(state): State<AppState>,
    Form(form): Form<RoomCheckForm>,
) -> Response {
    let mut body = AvailabilityJson {
        ok: false,
        message: String::new(),
        room_id: form.room_id().unwrap_or_default(),
        start_date: form.start.clone(),
        end_date: form.end.clone(),
    };

    let Some(room_id) = form.room_id() else {
        body.message = "invalid room id".into();
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    };
    let stay = match form.stay() {
        Ok(stay) => stay,
        Err(e) => {
            body.message = e.to_string();
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    match state.repo().is_room_free(room_id, stay).await {
        Ok(true) => {
            body.ok = true;
            body.message = "Available! Do you want to make a reservation?".into();
            Json(body).into_response()
        }
        Ok(false) => {
            body.message = "Not Available".into();
            Json(body).into_response()
        }
        Err(e) if e.is_storage_failure() => {
            body.message = "Internal server error".into();
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
        Err(StoreError::LimitExceeded(msg)) => {
            body.message = msg.into();
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
        Err(_) => {
            body.message = "Couldn't find data".into();
            Json(body).into_response()
        }
    }
}

pub async fn choose_room(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(room_id): Path<RoomId>,
) -> Response {
    match state.workflow.choose_room(session, room_id) {
        Ok(_) => Redirect::to("/make-reservation").into_response(),
        Err(e) => {
            state.sessions().put_error(session, e.to_string());
            Redirect::temporary("/").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BookRoomQuery {
    pub id: RoomId,
    pub s: String,
    pub e: String,
}

pub async fn book_room(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Query(q): Query<BookRoomQuery>,
) -> Response {
    match state.workflow.book_room(session, q.id, &q.s, &q.e).await {
        Ok(_) => Redirect::to("/make-reservation").into_response(),
        Err(WorkflowError::Storage(_)) => server_error(),
        Err(e) => {
            state.sessions().put_error(session, e.to_string());
            Redirect::temporary("/").into_response()
        }
    }
}

pub async fn make_reservation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    match state.workflow.reservation_form(session) {
        Ok(selection) => View::new("make-reservation")
            .data(json!({
                "room": selection.room,
                "start_date": selection.stay.start_str(),
                "end_date": selection.stay.end_str(),
                "form": GuestForm::default(),
            }))
            .messages(state.sessions(), session)
            .into_response(),
        Err(e) => {
            state.sessions().put_error(session, e.to_string());
            Redirect::temporary("/").into_response()
        }
    }
}

pub async fn post_make_reservation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Form(form): Form<GuestForm>,
) -> Response {
    match state.workflow.submit(session, form).await {
        Ok(SubmitOutcome::Booked(_)) => {
            state.sessions().put_flash(session, "Data stored successfully");
            Redirect::to("/reservation-summary").into_response()
        }
        Ok(SubmitOutcome::Invalid {
            errors,
            draft,
            selection,
        }) => View::new("make-reservation")
            .data(json!({
                "room": selection.room,
                "start_date": selection.stay.start_str(),
                "end_date": selection.stay.end_str(),
                "form": draft,
            }))
            .form_errors(errors)
            .into_response(),
        Err(e @ WorkflowError::RoomUnavailable) | Err(e @ WorkflowError::Input(_)) => {
            redirect_with_error(&state, session, e.to_string(), "/search-availability")
        }
        Err(WorkflowError::Storage(_)) => {
            redirect_with_error(&state, session, "cannot insert a reservation!", "/")
        }
        Err(e) => redirect_with_error(&state, session, e.to_string(), "/"),
    }
}

pub async fn reservation_summary(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    match state.workflow.summary(session) {
        Ok(confirmation) => View::new("reservation-summary")
            .data(json!({
                "reservation": confirmation,
                "start_date": confirmation.stay.start_str(),
                "end_date": confirmation.stay.end_str(),
            }))
            .messages(state.sessions(), session)
            .into_response(),
        Err(e) => {
            state.sessions().put_error(session, e.to_string());
            Redirect::temporary("/").into_response()
        }
    }
}

pub async fn login_page(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> View {
    View::new("login").messages(state.sessions(), session)
}

pub async fn post_login(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Form(form): Form<LoginForm>,
) -> Response {
    if let Err(errors) = form.check() {
        return View::new("login")
            .data(json!({ "email": form.email }))
            .form_errors(errors)
            .into_response();
    }

    match state.auth.authenticate(&form.email, &form.password).await {
        Ok(user_id) => {
            let renewed = state.sessions().renew_with_user(session, user_id);
            state.sessions().put_flash(renewed, "Logged in successfully");
            (
                Extension(SessionRenewed(renewed)),
                Redirect::to("/admin/dashboard"),
            )
                .into_response()
        }
        Err(e) => {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            match &e {
                AuthError::InvalidCredentials => warn!("failed staff login for {}", form.email),
                AuthError::Hash(_) => error!("staff login check failed: {e}"),
            }
            redirect_with_error(&state, session, "Invalid login credentials", "/user/login")
        }
    }
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    state.sessions().remove(session);
    let fresh = state.sessions().resume_or_create(None);
    (Extension(SessionRenewed(fresh)), Redirect::to("/user/login")).into_response()
}

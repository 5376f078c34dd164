pub mod admin;
pub mod guest;
pub mod view;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::Authenticator;
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use crate::repository::Repository;
use crate::session::{SessionId, SessionStore};
use crate::workflow::ReservationWorkflow;

pub const SESSION_COOKIE: &str = "roomkeep_session";

#[derive(Clone)]
pub struct AppState {
    pub workflow: ReservationWorkflow,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(workflow: ReservationWorkflow, auth: Arc<dyn Authenticator>) -> Self {
        Self { workflow, auth }
    }

    pub fn repo(&self) -> &Repository {
        self.workflow.repo()
    }

    pub fn sessions(&self) -> &SessionStore {
        self.workflow.sessions()
    }
}

/// Response extension: the handler replaced the caller's session id
/// (login, logout) and the cookie must follow.
#[derive(Debug, Clone, Copy)]
pub struct SessionRenewed(pub SessionId);

fn session_from_cookie(request: &Request) -> Option<SessionId> {
    request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find_map(|value| value.parse().ok())
}

/// Resolve the caller's session, expose it to handlers as
/// `Extension<SessionId>`, and set the cookie whenever the id changed.
async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = session_from_cookie(&request);
    let session = state.sessions().resume_or_create(presented);
    request.extensions_mut().insert(session);

    let mut response = next.run(request).await;

    let current = response
        .extensions()
        .get::<SessionRenewed>()
        .map_or(session, |r| r.0);
    if presented != Some(current) {
        let cookie = format!("{SESSION_COOKIE}={current}; Path=/; HttpOnly; SameSite=Lax");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(state.sessions().len() as f64);
    response
}

async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();

    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(start.elapsed().as_secs_f64());
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(guest::home))
        .route("/health", get(guest::health))
        .route("/rooms", get(guest::rooms))
        .route(
            "/search-availability",
            get(guest::search_page).post(guest::post_search),
        )
        .route("/search-availability-json", post(guest::availability_json))
        .route("/choose-room/{id}", get(guest::choose_room))
        .route("/book-room", get(guest::book_room))
        .route(
            "/make-reservation",
            get(guest::make_reservation).post(guest::post_make_reservation),
        )
        .route("/reservation-summary", get(guest::reservation_summary))
        .route("/user/login", get(guest::login_page).post(guest::post_login))
        .route("/user/logout", get(guest::logout))
        .nest("/admin", admin::routes(state.clone()))
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

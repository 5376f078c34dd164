use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::forms::FormErrors;
use crate::session::{SessionId, SessionStore};

/// A page as the renderer would receive it: view name plus data payload.
///
/// HTML templating is out of scope, so the payload is returned as JSON.
#[derive(Debug, Serialize)]
pub struct View {
    pub view: &'static str,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_errors: Option<FormErrors>,
    #[serde(skip)]
    status: StatusCode,
}

impl View {
    pub fn new(view: &'static str) -> Self {
        Self {
            view,
            data: json!({}),
            flash: None,
            error: None,
            form_errors: None,
            status: StatusCode::OK,
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Pick up the session's pending flash and error; each is shown once.
    pub fn messages(mut self, sessions: &SessionStore, session: SessionId) -> Self {
        self.flash = sessions.take_flash(session);
        self.error = sessions.take_error(session);
        self
    }

    pub fn form_errors(mut self, errors: FormErrors) -> Self {
        self.form_errors = Some(errors);
        self.status = StatusCode::UNPROCESSABLE_ENTITY;
        self
    }
}

impl IntoResponse for View {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Generic failure for storage errors nobody can act on.
pub fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn messages_are_consumed() {
        let sessions = SessionStore::new(Duration::from_secs(60));
        let id = sessions.resume_or_create(None);
        sessions.put_flash(id, "Data stored successfully");

        let view = View::new("home").messages(&sessions, id);
        assert_eq!(view.flash.as_deref(), Some("Data stored successfully"));
        assert!(View::new("home").messages(&sessions, id).flash.is_none());
    }

    #[test]
    fn empty_fields_are_omitted() {
        let body = serde_json::to_value(View::new("home")).unwrap();
        assert_eq!(body, json!({ "view": "home", "data": {} }));
    }

    #[test]
    fn form_errors_use_unprocessable_status() {
        let mut errors = FormErrors::default();
        errors.add("first_name", "This field can't be blank");
        let response = View::new("make-reservation").form_errors(errors).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

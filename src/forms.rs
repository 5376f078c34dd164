use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::model::{GuestDetails, RoomId, Stay, StayError};

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("This field can't be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Field name → validation messages for that field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// First message recorded for `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    pub fn has(&self, field: &str, message: &str) -> bool {
        self.0.get(field).is_some_and(|m| m.iter().any(|x| x == message))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ValidationErrors> for FormErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut out = FormErrors::default();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                let msg = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                out.add(&field, msg);
            }
        }
        out
    }
}

/// Guest details as typed into the reservation form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct GuestForm {
    #[serde(default)]
    #[validate(
        custom(function = "not_blank"),
        length(min = 3, message = "This must be at least 3 characters long")
    )]
    pub first_name: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub last_name: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"), email(message = "Invalid email address"))]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

impl GuestForm {
    /// The values as they will be stored.
    fn trimmed(&self) -> GuestForm {
        GuestForm {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }

    /// Rules apply to the trimmed values, the same ones `into_guest` keeps.
    pub fn check(&self) -> Result<(), FormErrors> {
        self.trimmed().validate().map_err(FormErrors::from)
    }

    pub fn into_guest(self) -> GuestDetails {
        let GuestForm {
            first_name,
            last_name,
            email,
            phone,
        } = self.trimmed();
        GuestDetails {
            first_name,
            last_name,
            email,
            phone,
        }
    }
}

impl From<&GuestDetails> for GuestForm {
    fn from(guest: &GuestDetails) -> Self {
        Self {
            first_name: guest.first_name.clone(),
            last_name: guest.last_name.clone(),
            email: guest.email.clone(),
            phone: guest.phone.clone(),
        }
    }
}

/// Raw arrival and departure dates from the search form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchForm {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

impl SearchForm {
    pub fn stay(&self) -> Result<Stay, StayError> {
        Stay::parse(self.start.trim(), self.end.trim())
    }
}

/// Single-room availability check posted by the room pages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomCheckForm {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub room_id: String,
}

impl RoomCheckForm {
    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id.trim().parse().ok()
    }

    pub fn stay(&self) -> Result<Stay, StayError> {
        Stay::parse(self.start.trim(), self.end.trim())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct LoginForm {
    #[serde(default)]
    #[validate(custom(function = "not_blank"), email(message = "Invalid email address"))]
    pub email: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub password: String,
}

impl LoginForm {
    pub fn check(&self) -> Result<(), FormErrors> {
        self.validate().map_err(FormErrors::from)
    }
}

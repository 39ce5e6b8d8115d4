mod repository;
mod service;

pub use repository::*;
pub use service::*;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::ngo::{NgoId, normalize_email};

pub type VolunteerId = Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolunteerStatus {
    #[default]
    Active,
    Inactive,
}

impl VolunteerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolunteerStatus::Active => "active",
            VolunteerStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for VolunteerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolunteerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(VolunteerStatus::Active),
            "inactive" => Ok(VolunteerStatus::Inactive),
            other => Err(format!("unknown volunteer status `{other}`")),
        }
    }
}

/// Volunteer as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volunteer {
    pub id: VolunteerId,
    pub name: String,
    pub email: String,
    /// Argon2 hash, only set before insertion.
    #[serde(skip)]
    pub password: Option<String>,
    pub ngo: NgoId,
    pub status: VolunteerStatus,
    pub created_at: DateTime<Utc>,
}

impl Volunteer {
    /// Active volunteer of `ngo`, `password` being already hashed.
    pub fn new(ngo: NgoId, form: NewVolunteer, password: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: form.name.trim().to_owned(),
            email: normalize_email(&form.email),
            password: Some(password),
            ngo,
            status: VolunteerStatus::Active,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct NewVolunteer {
    #[validate(length(
        min = 2,
        max = 100,
        message = "Name must be 2 to 100 characters long."
    ))]
    pub name: String,
    #[serde(deserialize_with = "crate::ngo::trimmed")]
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_never_serialized() {
        let volunteer = Volunteer::new(
            Uuid::new_v4(),
            NewVolunteer {
                name: " Vik ".into(),
                email: "V@Y.org".into(),
            },
            "$argon2id$hash".into(),
        );

        assert_eq!(volunteer.password.as_deref(), Some("$argon2id$hash"));
        let json = serde_json::to_value(&volunteer).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["email"], "v@y.org");
        assert_eq!(json["name"], "Vik");
        assert_eq!(json["status"], "active");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_form_validation() {
        let form = NewVolunteer {
            name: "V".into(),
            email: "nope".into(),
        };
        let errors = form.validate().unwrap_err();
        assert!(errors.errors().contains_key("name"));
        assert!(errors.errors().contains_key("email"));
    }

    #[test]
    fn test_email_is_trimmed_before_validation() {
        let form: NewVolunteer = serde_json::from_value(serde_json::json!({
            "name": "Vik",
            "email": "  V@Y.org "
        }))
        .unwrap();

        assert!(form.validate().is_ok());
        assert_eq!(form.email, "V@Y.org");
    }
}

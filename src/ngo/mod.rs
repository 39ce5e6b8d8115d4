mod repository;
pub(crate) mod service;

pub use repository::*;
pub use service::*;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

pub type NgoId = Uuid;

/// Oldest accepted recognition year.
pub const FIRST_RECOGNITION_YEAR: i32 = 1900;

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9][0-9 \-]{5,18}[0-9]$").expect("valid phone pattern")
});

/// Approval state of a registration.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NgoStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl NgoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NgoStatus::Pending => "pending",
            NgoStatus::Approved => "approved",
            NgoStatus::Rejected => "rejected",
        }
    }

    /// Whether an administrator may move a registration from `self` to `to`.
    ///
    /// Approval only happens once, an approved NGO can still be revoked and
    /// rejection is final.
    pub fn can_transition_to(self, to: NgoStatus) -> bool {
        matches!(
            (self, to),
            (NgoStatus::Pending, NgoStatus::Approved)
                | (NgoStatus::Pending, NgoStatus::Rejected)
                | (NgoStatus::Approved, NgoStatus::Rejected)
        )
    }
}

impl fmt::Display for NgoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NgoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NgoStatus::Pending),
            "approved" => Ok(NgoStatus::Approved),
            "rejected" => Ok(NgoStatus::Rejected),
            other => Err(format!("unknown NGO status `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrganizationType {
    #[serde(rename = "Animal Welfare")]
    AnimalWelfare,
    #[serde(rename = "Wildlife Conservation")]
    WildlifeConservation,
    #[serde(rename = "Pet Adoption")]
    PetAdoption,
    Other,
}

impl OrganizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationType::AnimalWelfare => "Animal Welfare",
            OrganizationType::WildlifeConservation => "Wildlife Conservation",
            OrganizationType::PetAdoption => "Pet Adoption",
            OrganizationType::Other => "Other",
        }
    }
}

impl FromStr for OrganizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Animal Welfare" => Ok(OrganizationType::AnimalWelfare),
            "Wildlife Conservation" => Ok(OrganizationType::WildlifeConservation),
            "Pet Adoption" => Ok(OrganizationType::PetAdoption),
            "Other" => Ok(OrganizationType::Other),
            other => Err(format!("unknown organization type `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactPerson {
    #[validate(length(
        min = 2,
        max = 100,
        message = "Contact name must be 2 to 100 characters long."
    ))]
    pub name: String,
    #[validate(custom(
        function = "validate_phone",
        message = "Phone number is invalid."
    ))]
    pub phone: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(length(max = 200))]
    pub street: Option<String>,
    #[validate(length(min = 1, max = 100, message = "City is required."))]
    pub city: String,
    #[validate(length(min = 1, max = 100, message = "State is required."))]
    pub state: String,
    #[validate(length(min = 3, max = 12, message = "Postal code is invalid."))]
    pub postal_code: String,
}

/// Links to documents hosted elsewhere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Documents {
    #[validate(url(message = "Registration certificate must be an URL."))]
    pub registration_certificate: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(url(message = "Tax exemption certificate must be an URL."))]
    pub tax_exemption_certificate: Option<String>,
}

/// Registration form.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewNgo {
    #[validate(length(
        min = 2,
        max = 150,
        message = "Name must be 2 to 150 characters long."
    ))]
    pub name: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(custom(
        function = "validate_phone",
        message = "Phone number is invalid."
    ))]
    pub phone: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(custom(
        function = "validate_phone",
        message = "Alternate phone number is invalid."
    ))]
    pub alternate_phone: Option<String>,
    #[validate(length(
        min = 1,
        max = 100,
        message = "Registration number is required."
    ))]
    pub registration_number: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(length(max = 100))]
    pub certificate_number: Option<String>,
    #[serde(default)]
    pub recognition_year: Option<i32>,
    pub organization_type: OrganizationType,
    #[validate(nested)]
    pub contact_person: ContactPerson,
    #[validate(nested)]
    pub address: Address,
    #[validate(
        length(min = 1, message = "At least one focus area is required."),
        custom(
            function = "validate_focus_areas",
            message = "Focus areas cannot be blank."
        )
    )]
    pub focus_areas: Vec<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(url(message = "Website must be an URL."))]
    pub website: Option<String>,
    #[validate(nested)]
    pub documents: Documents,
}

impl NewNgo {
    /// Run derived rules plus those depending on the current date.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        if let Some(year) = self.recognition_year {
            let current = Utc::now().year();
            if !(FIRST_RECOGNITION_YEAR..=current).contains(&year) {
                errors.add(
                    "recognition_year",
                    ValidationError::new("range").with_message(
                        format!(
                            "Recognition year must be between {FIRST_RECOGNITION_YEAR} and {current}."
                        )
                        .into(),
                    ),
                );
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// NGO as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ngo {
    pub id: NgoId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub alternate_phone: Option<String>,
    pub registration_number: String,
    pub certificate_number: Option<String>,
    pub recognition_year: Option<i32>,
    pub organization_type: OrganizationType,
    pub contact_person: ContactPerson,
    pub address: Address,
    pub focus_areas: Vec<String>,
    pub website: Option<String>,
    pub documents: Documents,
    #[serde(skip)]
    pub password: Option<String>,
    pub status: NgoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ngo {
    /// Pending registration built from a validated form.
    pub fn new(form: NewNgo) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: form.name.trim().to_owned(),
            email: normalize_email(&form.email),
            phone: form.phone.trim().to_owned(),
            alternate_phone: form.alternate_phone,
            registration_number: form.registration_number.trim().to_owned(),
            certificate_number: form
                .certificate_number
                .map(|number| number.trim().to_owned()),
            recognition_year: form.recognition_year,
            organization_type: form.organization_type,
            contact_person: ContactPerson {
                email: normalize_email(&form.contact_person.email),
                ..form.contact_person
            },
            address: form.address,
            focus_areas: form
                .focus_areas
                .into_iter()
                .map(|area| area.trim().to_owned())
                .collect(),
            website: form.website,
            documents: form.documents,
            password: None,
            status: NgoStatus::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> NgoSummary {
        NgoSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            status: self.status,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NgoSummary {
    pub id: NgoId,
    pub name: String,
    pub email: String,
    pub status: NgoStatus,
}

/// Public view of a registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusProjection {
    pub name: String,
    pub status: NgoStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Ngo> for StatusProjection {
    fn from(ngo: &Ngo) -> Self {
        Self {
            name: ngo.name.clone(),
            status: ngo.status,
            created_at: ngo.created_at,
        }
    }
}

/// Lookup form of emails.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if !PHONE.is_match(phone.trim()) {
        return Err(ValidationError::new("phone"));
    }

    Ok(())
}

fn validate_focus_areas(areas: &[String]) -> Result<(), ValidationError> {
    if areas.iter().any(|area| area.trim().is_empty()) {
        return Err(ValidationError::new("focus_areas"));
    }

    Ok(())
}

/// Surrounding whitespace is dropped before validation.
pub(crate) fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(value.trim().to_owned())
}

/// Treat `""` like a missing optional field.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.trim().is_empty()))
}

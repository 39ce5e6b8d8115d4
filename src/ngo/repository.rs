//! Handle NGO database requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::{Result, ServerError};
use crate::ngo::{
    Address, ContactPerson, Documents, Ngo, NgoId, NgoStatus,
};

/// Status change applied only if the NGO is still in `from`.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub from: NgoStatus,
    pub to: NgoStatus,
    /// New credential, the current one is kept when `None`.
    pub password: Option<String>,
    /// Stored only when moving to `rejected`.
    pub rejection_reason: Option<String>,
}

impl Transition {
    pub fn approve(password_hash: String) -> Self {
        Self {
            from: NgoStatus::Pending,
            to: NgoStatus::Approved,
            password: Some(password_hash),
            rejection_reason: None,
        }
    }

    pub fn reject(from: NgoStatus, reason: Option<String>) -> Self {
        Self {
            from,
            to: NgoStatus::Rejected,
            password: None,
            rejection_reason: reason,
        }
    }
}

/// Storage of NGO registrations.
#[async_trait]
pub trait NgoRepository: Send + Sync {
    /// Insert a new registration.
    ///
    /// Fails with [`ServerError::DuplicateRegistration`] naming every
    /// colliding field when email, registration number or certificate number
    /// is already taken.
    async fn insert(&self, ngo: &Ngo) -> Result<()>;

    /// Find an NGO, without its credential.
    async fn find_by_id(&self, id: NgoId) -> Result<Option<Ngo>>;

    /// Find an NGO by normalized email, credential included.
    async fn find_for_login(&self, email: &str) -> Result<Option<Ngo>>;

    /// Newest first, without credentials.
    async fn list(&self, status: Option<NgoStatus>) -> Result<Vec<Ngo>>;

    /// Conditional status update. Returns `false` when the NGO does not
    /// exist or is no longer in `transition.from`.
    async fn transition(&self, id: NgoId, transition: &Transition)
    -> Result<bool>;
}

/// Camel-cased names of colliding fields.
pub(crate) fn duplicate_fields(
    email: bool,
    registration_number: bool,
    certificate_number: bool,
) -> Vec<&'static str> {
    [
        (email, "email"),
        (registration_number, "registrationNumber"),
        (certificate_number, "certificateNumber"),
    ]
    .into_iter()
    .filter_map(|(taken, field)| taken.then_some(field))
    .collect()
}

const SELECT_COLUMNS: &str = r#"id, name, email, phone, alternate_phone,
    registration_number, certificate_number, recognition_year,
    organization_type, contact_name, contact_phone, contact_email, street,
    city, state, postal_code, focus_areas, website, registration_certificate,
    tax_exemption_certificate, status, rejection_reason, created_at,
    updated_at"#;

#[derive(FromRow)]
struct NgoRow {
    id: NgoId,
    name: String,
    email: String,
    phone: String,
    alternate_phone: Option<String>,
    registration_number: String,
    certificate_number: Option<String>,
    recognition_year: Option<i32>,
    organization_type: String,
    contact_name: String,
    contact_phone: String,
    contact_email: String,
    street: Option<String>,
    city: String,
    state: String,
    postal_code: String,
    focus_areas: Vec<String>,
    website: Option<String>,
    registration_certificate: String,
    tax_exemption_certificate: Option<String>,
    password: Option<String>,
    status: String,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NgoRow> for Ngo {
    type Error = ServerError;

    fn try_from(row: NgoRow) -> Result<Self> {
        Ok(Ngo {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            alternate_phone: row.alternate_phone,
            registration_number: row.registration_number,
            certificate_number: row.certificate_number,
            recognition_year: row.recognition_year,
            organization_type: row
                .organization_type
                .parse()
                .map_err(ServerError::internal)?,
            contact_person: ContactPerson {
                name: row.contact_name,
                phone: row.contact_phone,
                email: row.contact_email,
            },
            address: Address {
                street: row.street,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
            },
            focus_areas: row.focus_areas,
            website: row.website,
            documents: Documents {
                registration_certificate: row.registration_certificate,
                tax_exemption_certificate: row.tax_exemption_certificate,
            },
            password: row.password,
            status: row.status.parse().map_err(ServerError::internal)?,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed [`NgoRepository`].
#[derive(Clone)]
pub struct PgNgoRepository {
    pool: PgPool,
}

impl PgNgoRepository {
    /// Create a new [`PgNgoRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn taken_fields(&self, ngo: &Ngo) -> Result<Vec<&'static str>> {
        let (email, registration_number, certificate_number) =
            sqlx::query_as::<_, (bool, bool, bool)>(
                r#"SELECT
                    COALESCE(BOOL_OR(email = $1), FALSE),
                    COALESCE(BOOL_OR(registration_number = $2), FALSE),
                    COALESCE(BOOL_OR(certificate_number = $3), FALSE)
                FROM ngos
                WHERE email = $1 OR registration_number = $2 OR certificate_number = $3"#,
            )
            .bind(&ngo.email)
            .bind(&ngo.registration_number)
            .bind(&ngo.certificate_number)
            .fetch_one(&self.pool)
            .await?;

        Ok(duplicate_fields(email, registration_number, certificate_number))
    }
}

#[async_trait]
impl NgoRepository for PgNgoRepository {
    async fn insert(&self, ngo: &Ngo) -> Result<()> {
        let fields = self.taken_fields(ngo).await?;
        if !fields.is_empty() {
            return Err(ServerError::DuplicateRegistration { fields });
        }

        let result = sqlx::query(
            r#"INSERT INTO ngos (id, name, email, phone, alternate_phone,
                registration_number, certificate_number, recognition_year,
                organization_type, contact_name, contact_phone, contact_email,
                street, city, state, postal_code, focus_areas, website,
                registration_certificate, tax_exemption_certificate, status,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)"#,
        )
        .bind(ngo.id)
        .bind(&ngo.name)
        .bind(&ngo.email)
        .bind(&ngo.phone)
        .bind(&ngo.alternate_phone)
        .bind(&ngo.registration_number)
        .bind(&ngo.certificate_number)
        .bind(ngo.recognition_year)
        .bind(ngo.organization_type.as_str())
        .bind(&ngo.contact_person.name)
        .bind(&ngo.contact_person.phone)
        .bind(&ngo.contact_person.email)
        .bind(&ngo.address.street)
        .bind(&ngo.address.city)
        .bind(&ngo.address.state)
        .bind(&ngo.address.postal_code)
        .bind(&ngo.focus_areas)
        .bind(&ngo.website)
        .bind(&ngo.documents.registration_certificate)
        .bind(&ngo.documents.tax_exemption_certificate)
        .bind(ngo.status.as_str())
        .bind(ngo.created_at)
        .bind(ngo.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // Lost a race against a concurrent registration.
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                let field = match err.constraint() {
                    Some("ngos_registration_number_key") => {
                        "registrationNumber"
                    },
                    Some("ngos_certificate_number_key") => "certificateNumber",
                    _ => "email",
                };
                Err(ServerError::DuplicateRegistration {
                    fields: vec![field],
                })
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn find_by_id(&self, id: NgoId) -> Result<Option<Ngo>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS}, NULL::TEXT AS password FROM ngos WHERE id = $1"
        );

        sqlx::query_as::<_, NgoRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Ngo::try_from)
            .transpose()
    }

    async fn find_for_login(&self, email: &str) -> Result<Option<Ngo>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS}, password FROM ngos WHERE email = $1"
        );

        sqlx::query_as::<_, NgoRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .map(Ngo::try_from)
            .transpose()
    }

    async fn list(&self, status: Option<NgoStatus>) -> Result<Vec<Ngo>> {
        let query = format!(
            r#"SELECT {SELECT_COLUMNS}, NULL::TEXT AS password FROM ngos
            WHERE $1::TEXT IS NULL OR status = $1
            ORDER BY created_at DESC"#
        );

        sqlx::query_as::<_, NgoRow>(&query)
            .bind(status.map(|status| status.as_str()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Ngo::try_from)
            .collect()
    }

    async fn transition(
        &self,
        id: NgoId,
        transition: &Transition,
    ) -> Result<bool> {
        let reason = if transition.to == NgoStatus::Rejected {
            transition.rejection_reason.as_deref()
        } else {
            None
        };

        let result = sqlx::query(
            r#"UPDATE ngos
            SET status = $1,
                password = COALESCE($2, password),
                rejection_reason = $3,
                updated_at = NOW()
            WHERE id = $4 AND status = $5"#,
        )
        .bind(transition.to.as_str())
        .bind(&transition.password)
        .bind(reason)
        .bind(id)
        .bind(transition.from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

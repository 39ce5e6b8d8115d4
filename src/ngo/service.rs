use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoError, PasswordManager, generate_temporary_password};
use crate::error::{Result, ServerError};
use crate::mail::{Notification, NotificationGateway, Template};
use crate::ngo::{
    NewNgo, Ngo, NgoId, NgoRepository, NgoStatus, NgoSummary,
    StatusProjection, Transition, normalize_email,
};
use crate::token::{Role, TokenManager};

pub const TOKEN_TYPE: &str = "Bearer";

/// Issued on successful login.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session<T> {
    pub token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(flatten)]
    pub subject: T,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct NgoSession {
    pub ngo: NgoSummary,
}

/// NGOs whose status is currently being changed.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<NgoId>>>);

impl InFlight {
    fn claim(&self, id: NgoId) -> Option<InFlightGuard> {
        let inserted = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);

        inserted.then(|| InFlightGuard {
            set: self.clone(),
            id,
        })
    }
}

struct InFlightGuard {
    set: InFlight,
    id: NgoId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Registration and approval of NGOs.
#[derive(Clone)]
pub struct NgoService {
    repo: Arc<dyn NgoRepository>,
    passwords: Arc<PasswordManager>,
    token: TokenManager,
    notifications: NotificationGateway,
    in_flight: InFlight,
    // Verified when no credential exists, so every login costs one Argon2 run.
    dummy_hash: Arc<String>,
}

impl NgoService {
    /// Create a new [`NgoService`].
    pub fn new(
        repo: Arc<dyn NgoRepository>,
        passwords: Arc<PasswordManager>,
        token: TokenManager,
        notifications: NotificationGateway,
    ) -> Result<Self> {
        let dummy_hash = passwords.hash_password("pashurakshak")?;

        Ok(Self {
            repo,
            passwords,
            token,
            notifications,
            in_flight: InFlight::default(),
            dummy_hash: Arc::new(dummy_hash),
        })
    }

    fn claim(&self, id: NgoId) -> Result<InFlightGuard> {
        self.in_flight.claim(id).ok_or_else(|| {
            ServerError::Conflict("NGO approval is already in progress".into())
        })
    }

    /// Record a pending registration.
    pub async fn register(&self, form: NewNgo) -> Result<Ngo> {
        form.check()?;

        let ngo = Ngo::new(form);
        self.repo.insert(&ngo).await?;

        metrics::counter!("ngo_registrations_total").increment(1);
        tracing::info!(ngo_id = %ngo.id, "registration received");

        self.notifications.dispatch(
            Notification::new(Template::RegistrationReceived, &ngo.email)
                .with("name", ngo.name.clone())
                .with("registrationId", ngo.id.to_string()),
        );

        Ok(ngo)
    }

    /// Approve a pending NGO and deliver its temporary password.
    ///
    /// Nothing is stored unless the password reached the NGO.
    pub async fn approve(&self, id: NgoId) -> Result<Ngo> {
        let _guard = self.claim(id)?;

        let ngo = self.get(id).await?;
        ensure_transition(ngo.status, NgoStatus::Approved)?;

        let password = generate_temporary_password();
        let hash = self.passwords.hash_blocking(password.clone()).await?;

        let notification = Notification::new(Template::Approved, &ngo.email)
            .with("name", ngo.name.clone())
            .with("temporaryPassword", password);
        if !self.notifications.deliver(&notification).await {
            return Err(ServerError::NotificationFailure);
        }

        if !self.repo.transition(id, &Transition::approve(hash)).await? {
            return Err(ServerError::Conflict(
                "NGO is no longer pending".into(),
            ));
        }

        record_transition(id, NgoStatus::Approved);
        self.get(id).await
    }

    /// Reject a pending NGO or revoke an approved one.
    pub async fn reject(&self, id: NgoId, reason: Option<String>) -> Result<Ngo> {
        let _guard = self.claim(id)?;

        let ngo = self.get(id).await?;
        ensure_transition(ngo.status, NgoStatus::Rejected)?;

        let reason = reason
            .map(|reason| reason.trim().to_owned())
            .filter(|reason| !reason.is_empty());

        if !self
            .repo
            .transition(id, &Transition::reject(ngo.status, reason.clone()))
            .await?
        {
            return Err(ServerError::Conflict(
                "NGO status changed, please retry".into(),
            ));
        }

        record_transition(id, NgoStatus::Rejected);

        let template = match ngo.status {
            NgoStatus::Pending => Template::Rejected,
            _ => Template::StatusChanged,
        };
        self.notifications.dispatch(
            Notification::new(template, &ngo.email)
                .with("name", ngo.name.clone())
                .with("status", NgoStatus::Rejected.as_str())
                .with("reason", reason),
        );

        self.get(id).await
    }

    /// Exchange credentials of an approved NGO for a token.
    pub async fn login(
        &self,
        email: &str,
        password: String,
    ) -> Result<Session<NgoSession>> {
        let found = self.repo.find_for_login(&normalize_email(email)).await?;
        let hash = found
            .as_ref()
            .and_then(|ngo| ngo.password.clone())
            .unwrap_or_else(|| self.dummy_hash.to_string());

        let verified = match self.passwords.verify_blocking(password, hash).await {
            Ok(verified) => verified,
            Err(CryptoError::MalformedHash) => {
                tracing::error!(email, "stored password hash is malformed");
                false
            },
            Err(err) => return Err(err.into()),
        };

        let ngo = match found {
            Some(ngo) if verified && ngo.password.is_some() => ngo,
            _ => return Err(ServerError::InvalidCredentials),
        };

        if ngo.status != NgoStatus::Approved {
            return Err(ServerError::NotApproved);
        }

        let token = self.token.issue(&ngo.id.to_string(), Role::Ngo)?;
        tracing::info!(ngo_id = %ngo.id, "ngo logged in");

        Ok(Session {
            token,
            token_type: TOKEN_TYPE.into(),
            expires_in: self.token.expires_in(),
            subject: NgoSession { ngo: ngo.summary() },
        })
    }

    /// Public projection of a registration.
    pub async fn status(&self, id: NgoId) -> Result<StatusProjection> {
        Ok(StatusProjection::from(&self.get(id).await?))
    }

    /// Full record, never with its credential.
    pub async fn get(&self, id: NgoId) -> Result<Ngo> {
        self.repo.find_by_id(id).await?.ok_or(ServerError::NotFound)
    }

    /// Registrations, newest first.
    pub async fn list(&self, status: Option<NgoStatus>) -> Result<Vec<Ngo>> {
        self.repo.list(status).await
    }
}

fn ensure_transition(from: NgoStatus, to: NgoStatus) -> Result<()> {
    if from.can_transition_to(to) {
        return Ok(());
    }

    Err(ServerError::Conflict(format!("NGO is already {from}")))
}

fn record_transition(id: NgoId, to: NgoStatus) {
    metrics::counter!("ngo_status_transitions_total", "to" => to.as_str())
        .increment(1);
    tracing::info!(ngo_id = %id, status = %to, "ngo status changed");
}

//! Middlewares resolving and checking who calls a route.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::ngo::{NgoId, NgoRepository, NgoStatus};
use crate::token::{Role, TokenManager};

const BEARER: &str = "Bearer ";

/// Authenticated caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Principal {
    Admin {
        email: String,
    },
    Ngo {
        id: NgoId,
        name: String,
        status: NgoStatus,
    },
}

impl Principal {
    pub fn role(&self) -> Role {
        match self {
            Principal::Admin { .. } => Role::Admin,
            Principal::Ngo { .. } => Role::Ngo,
        }
    }
}

/// NGO allowed to manage volunteers.
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovedNgo {
    pub id: NgoId,
    pub name: String,
}

/// Turns bearer tokens into a [`Principal`].
#[derive(Clone)]
pub struct Authenticator {
    token: TokenManager,
    ngos: Arc<dyn NgoRepository>,
}

impl Authenticator {
    /// Create a new [`Authenticator`].
    pub fn new(token: TokenManager, ngos: Arc<dyn NgoRepository>) -> Self {
        Self { token, ngos }
    }

    /// Resolve the value of an `Authorization` header.
    ///
    /// NGOs are loaded on every call, so status changes apply to tokens
    /// issued before them.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Principal> {
        let token = authorization
            .and_then(|value| value.strip_prefix(BEARER))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ServerError::Unauthorized)?;

        let claims = self.token.verify(token)?;

        match claims.role {
            Role::Admin => Ok(Principal::Admin { email: claims.sub }),
            Role::Ngo => {
                let id = claims
                    .sub
                    .parse::<NgoId>()
                    .map_err(|_| ServerError::Unauthorized)?;
                let ngo = self
                    .ngos
                    .find_by_id(id)
                    .await?
                    .ok_or(ServerError::Unauthorized)?;

                Ok(Principal::Ngo {
                    id: ngo.id,
                    name: ngo.name,
                    status: ngo.status,
                })
            },
        }
    }
}

/// Resolve the caller and store it on request extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let principal = state.auth.resolve(authorization).await?;
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Reject callers whose role is not in `roles`.
pub async fn restrict_to(
    roles: &[Role],
    req: Request,
    next: Next,
) -> Result<Response> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .ok_or(ServerError::Unauthorized)?;

    if !roles.contains(&principal.role()) {
        tracing::debug!(role = %principal.role(), "role not allowed on route");
        return Err(ServerError::Forbidden);
    }

    Ok(next.run(req).await)
}

pub async fn admin_only(req: Request, next: Next) -> Result<Response> {
    restrict_to(&[Role::Admin], req, next).await
}

pub async fn ngo_only(req: Request, next: Next) -> Result<Response> {
    restrict_to(&[Role::Ngo], req, next).await
}

/// Only approved NGOs get through.
pub async fn require_approved(mut req: Request, next: Next) -> Result<Response> {
    let approved = match req.extensions().get::<Principal>() {
        Some(Principal::Ngo {
            id,
            name,
            status: NgoStatus::Approved,
        }) => ApprovedNgo {
            id: *id,
            name: name.clone(),
        },
        Some(_) => return Err(ServerError::Forbidden),
        None => return Err(ServerError::Unauthorized),
    };

    req.extensions_mut().insert(approved);
    Ok(next.run(req).await)
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ServerError::Unauthorized)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ApprovedNgo {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self> {
        parts
            .extensions
            .get::<ApprovedNgo>()
            .cloned()
            .ok_or(ServerError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::database::MemoryStore;
    use crate::ngo::tests::form;
    use crate::ngo::{Ngo, Transition};
    use crate::token::TokenError;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn authenticator() -> (Authenticator, Arc<MemoryStore>, TokenManager) {
        let store = Arc::new(MemoryStore::default());
        let token = TokenManager::new("https://api.example.org/", SECRET);
        (
            Authenticator::new(token.clone(), store.clone()),
            store,
            token,
        )
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header() {
        let (auth, _, token) = authenticator();
        let jwt = token.issue("admin@example.org", Role::Admin).unwrap();

        for header in [None, Some(""), Some("Bearer "), Some(jwt.as_str())] {
            assert!(matches!(
                auth.resolve(header).await,
                Err(ServerError::Unauthorized)
            ));
        }
    }

    #[tokio::test]
    async fn test_admin_principal() {
        let (auth, _, token) = authenticator();
        let jwt = token.issue("admin@example.org", Role::Admin).unwrap();

        assert_eq!(
            auth.resolve(Some(&format!("Bearer {jwt}"))).await.unwrap(),
            Principal::Admin {
                email: "admin@example.org".into()
            }
        );
    }

    #[tokio::test]
    async fn test_ngo_principal_tracks_status() {
        let (auth, store, token) = authenticator();
        let ngo = Ngo::new(form("a@x.org", "REG-1"));
        NgoRepository::insert(store.as_ref(), &ngo).await.unwrap();

        let header = format!(
            "Bearer {}",
            token.issue(&ngo.id.to_string(), Role::Ngo).unwrap()
        );

        let principal = auth.resolve(Some(&header)).await.unwrap();
        assert!(matches!(
            principal,
            Principal::Ngo { status: NgoStatus::Pending, .. }
        ));

        store
            .transition(ngo.id, &Transition::approve("hash".into()))
            .await
            .unwrap();
        let principal = auth.resolve(Some(&header)).await.unwrap();
        assert!(matches!(
            principal,
            Principal::Ngo { status: NgoStatus::Approved, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_or_expired_subject() {
        let (auth, _, token) = authenticator();

        let unknown = token.issue(&Uuid::new_v4().to_string(), Role::Ngo).unwrap();
        assert!(matches!(
            auth.resolve(Some(&format!("Bearer {unknown}"))).await,
            Err(ServerError::Unauthorized)
        ));

        let garbage = token.issue("not-a-uuid", Role::Ngo).unwrap();
        assert!(matches!(
            auth.resolve(Some(&format!("Bearer {garbage}"))).await,
            Err(ServerError::Unauthorized)
        ));

        let expired = token.expired("admin@example.org", Role::Admin);
        assert!(matches!(
            auth.resolve(Some(&format!("Bearer {expired}"))).await,
            Err(ServerError::Token(TokenError::Expired))
        ));
    }

    #[test]
    fn test_principal_serialization() {
        let principal = Principal::Admin {
            email: "admin@example.org".into(),
        };
        let json = serde_json::to_value(&principal).unwrap();
        assert_eq!(json["role"], "admin");
        assert_eq!(json["email"], "admin@example.org");
    }
}

//! Administrator login and NGO lookups.

use axum::Router;
use axum::extract::{Path, State};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};

use crate::AppState;
use crate::admin::AdminSession;
use crate::error::Result;
use crate::middleware::{Principal, admin_only, authenticate};
use crate::ngo::{Ngo, Session};
use crate::router::{ApiResponse, Credentials, Valid, parse_id};

async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<Credentials>,
) -> Result<ApiResponse<Session<AdminSession>>> {
    let session = state.admins.login(&body.email, body.password).await?;
    Ok(ApiResponse::data(session).message("Admin login successful."))
}

async fn verify(principal: Principal) -> ApiResponse<Principal> {
    ApiResponse::data(principal)
}

async fn ngo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Ngo>> {
    Ok(ApiResponse::data(state.ngos.get(parse_id(&id)?).await?))
}

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/verify", get(verify))
        .route("/ngo/{id}", get(ngo))
        .route_layer(from_fn(admin_only))
        .route_layer(from_fn_with_state(state, authenticate));

    Router::new()
        // `POST /admin/login` goes to `login`.
        .route("/login", post(login))
        .merge(protected)
}

//! NGO registration, approval and login.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use axum::routing::{get, patch, post};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Result, ServerError};
use crate::middleware::{Principal, admin_only, authenticate, ngo_only};
use crate::ngo::{
    NewNgo, Ngo, NgoId, NgoSession, NgoStatus, Session, StatusProjection,
};
use crate::AppState;
use crate::router::{ApiResponse, Credentials, Valid, parse_id};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub registration_id: NgoId,
    pub name: String,
    pub email: String,
    pub status: NgoStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<NgoStatus>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RejectBody {
    #[serde(default)]
    #[validate(length(max = 500, message = "Reason must be at most 500 characters long."))]
    reason: Option<String>,
}

/// Handler to register an NGO.
async fn register(
    State(state): State<AppState>,
    Valid(body): Valid<NewNgo>,
) -> Result<(StatusCode, ApiResponse<Receipt>)> {
    let ngo = state.ngos.register(body).await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::data(Receipt {
            registration_id: ngo.id,
            name: ngo.name,
            email: ngo.email,
            status: ngo.status,
        })
        .message("NGO registration submitted successfully. Please wait for admin approval."),
    ))
}

async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<Credentials>,
) -> Result<ApiResponse<Session<NgoSession>>> {
    let session = state.ngos.login(&body.email, body.password).await?;
    Ok(ApiResponse::data(session).message("Login successful."))
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<StatusProjection>> {
    let status = state.ngos.status(parse_id(&id)?).await?;
    Ok(ApiResponse::data(status))
}

async fn profile(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<ApiResponse<Ngo>> {
    let Principal::Ngo { id, .. } = principal else {
        return Err(ServerError::Forbidden);
    };

    Ok(ApiResponse::data(state.ngos.get(id).await?))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<Vec<Ngo>>> {
    Ok(ApiResponse::data(state.ngos.list(query.status).await?))
}

async fn list_pending(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<Ngo>>> {
    Ok(ApiResponse::data(
        state.ngos.list(Some(NgoStatus::Pending)).await?,
    ))
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Ngo>> {
    let ngo = state.ngos.approve(parse_id(&id)?).await?;
    let message = format!(
        "NGO approved successfully. Login credentials have been sent to {}.",
        ngo.email
    );

    Ok(ApiResponse::data(ngo).message(message))
}

/// The body is optional, an empty one carries no reason.
async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<ApiResponse<Ngo>> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        RejectBody::default()
    } else {
        serde_json::from_slice::<RejectBody>(&body)
            .map_err(|err| ServerError::ParsingForm(Box::new(err)))?
    };
    body.validate()?;

    let ngo = state.ngos.reject(parse_id(&id)?, body.reason).await?;
    Ok(ApiResponse::data(ngo).message("NGO rejected."))
}

pub fn router(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        // `GET /ngo/all` goes to `list`. Admin only.
        .route("/all", get(list))
        .route("/pending", get(list_pending))
        .route("/{id}/approve", patch(approve))
        .route("/{id}/reject", patch(reject))
        .route_layer(from_fn(admin_only))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    let ngo = Router::new()
        .route("/profile", get(profile))
        .route_layer(from_fn(ngo_only))
        .route_layer(from_fn_with_state(state, authenticate));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/status/{id}", get(status))
        .merge(admin)
        .merge(ngo)
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::{Value, json};

    use super::*;
    use crate::router::tests::read_json;
    use crate::{TestContext, make_request};

    fn registration(email: &str, registration_number: &str) -> String {
        json!({
            "name": "Paws & Claws",
            "email": email,
            "phone": "+91 98765 43210",
            "registrationNumber": registration_number,
            "organizationType": "Animal Welfare",
            "contactPerson": {
                "name": "Asha Rao",
                "phone": "9876543210",
                "email": "asha@example.org"
            },
            "address": {
                "city": "Pune",
                "state": "Maharashtra",
                "postalCode": "411001"
            },
            "focusAreas": ["rescue"],
            "documents": {
                "registrationCertificate": "https://docs.example.org/reg.pdf"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_register_and_check_status() {
        let ctx = TestContext::new();

        let response = make_request(
            None,
            ctx.app(),
            Method::POST,
            "/ngo/register",
            registration(" A@x.org ", "REG-1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body: ApiResponse<Receipt> = read_json(response).await;
        let receipt = body.data.unwrap();
        assert_eq!(receipt.email, "a@x.org");
        assert_eq!(receipt.status, NgoStatus::Pending);

        let response = make_request(
            None,
            ctx.app(),
            Method::GET,
            &format!("/ngo/status/{}", receipt.registration_id),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = read_json(response).await;
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["name"], "Paws & Claws");
        assert!(body["data"].get("email").is_none());
    }

    #[tokio::test]
    async fn test_register_errors() {
        let ctx = TestContext::new();
        make_request(None, ctx.app(), Method::POST, "/ngo/register", registration("a@x.org", "REG-1")).await;

        let response = make_request(
            None,
            ctx.app(),
            Method::POST,
            "/ngo/register",
            registration("a@x.org", "REG-1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "duplicate_registration");

        let response = make_request(
            None,
            ctx.app(),
            Method::POST,
            "/ngo/register",
            json!({ "name": "Paws" }).to_string(),
        )
        .await;
        assert!(response.status().is_client_error());

        let mut invalid: Value = serde_json::from_str(&registration("b@x.org", "REG-2")).unwrap();
        invalid["focusAreas"] = json!([]);
        let response = make_request(None, ctx.app(), Method::POST, "/ngo/register", invalid.to_string()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_json(response).await;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["errors"][0]["field"], "focus_areas");
    }

    #[tokio::test]
    async fn test_unknown_status() {
        let ctx = TestContext::new();

        let unknown = format!("/ngo/status/{}", uuid::Uuid::new_v4());
        for path in ["/ngo/status/not-a-uuid".to_owned(), unknown] {
            let response = make_request(None, ctx.app(), Method::GET, &path, String::new()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_admin_routes_are_gated() {
        let ctx = TestContext::new();

        let response = make_request(None, ctx.app(), Method::GET, "/ngo/all", String::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let id = ctx.approved_ngo("a@x.org", "REG-1").await;
        let ngo_token = ctx.ngo_token(id);
        let response = make_request(Some(&ngo_token), ctx.app(), Method::GET, "/ngo/pending", String::new()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            Some(&ngo_token),
            ctx.app(),
            Method::PATCH,
            &format!("/ngo/{id}/reject"),
            json!({ "reason": "self" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // And admins have no profile.
        let response = make_request(Some(&ctx.admin_token()), ctx.app(), Method::GET, "/ngo/profile", String::new()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_listings() {
        let ctx = TestContext::new();
        let admin = ctx.admin_token();
        let approved = ctx.approved_ngo("a@x.org", "REG-1").await;
        make_request(None, ctx.app(), Method::POST, "/ngo/register", registration("b@x.org", "REG-2")).await;

        let response = make_request(Some(&admin), ctx.app(), Method::GET, "/ngo/all", String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = read_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert!(body["data"][0].get("password").is_none());

        let response = make_request(Some(&admin), ctx.app(), Method::GET, "/ngo/pending", String::new()).await;
        let body: Value = read_json(response).await;
        let pending = body["data"].as_array().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["email"], "b@x.org");

        let response = make_request(Some(&admin), ctx.app(), Method::GET, "/ngo/all?status=approved", String::new()).await;
        let body: Value = read_json(response).await;
        assert_eq!(body["data"][0]["id"], approved.to_string());
    }

    #[tokio::test]
    async fn test_approve_reject_and_login() {
        let ctx = TestContext::new();
        let admin = ctx.admin_token();
        let response = make_request(None, ctx.app(), Method::POST, "/ngo/register", registration("a@x.org", "REG-1")).await;
        let receipt: ApiResponse<Receipt> = read_json(response).await;
        let id = receipt.data.unwrap().registration_id;

        // Pending NGOs cannot log in.
        let response = make_request(
            None,
            ctx.app(),
            Method::POST,
            "/ngo/login",
            json!({ "email": "a@x.org", "password": "whatever" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(Some(&admin), ctx.app(), Method::PATCH, &format!("/ngo/{id}/approve"), String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = read_json(response).await;
        assert_eq!(body["data"]["status"], "approved");
        assert!(!body.to_string().contains(&ctx.delivered_password("a@x.org")));

        let response = make_request(Some(&admin), ctx.app(), Method::PATCH, &format!("/ngo/{id}/approve"), String::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_json(response).await;
        assert_eq!(body["error"], "conflict");

        let response = make_request(
            None,
            ctx.app(),
            Method::POST,
            "/ngo/login",
            json!({ "email": " A@x.org ", "password": ctx.delivered_password("a@x.org") }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: ApiResponse<Session<NgoSession>> = read_json(response).await;
        let session = body.data.unwrap();
        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.subject.ngo.id, id);

        let response = make_request(Some(&session.token), ctx.app(), Method::GET, "/ngo/profile", String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = read_json(response).await;
        assert_eq!(body["data"]["registrationNumber"], "REG-1");

        // Revocation.
        let response = make_request(
            Some(&admin),
            ctx.app(),
            Method::PATCH,
            &format!("/ngo/{id}/reject"),
            json!({ "reason": "incomplete docs" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = read_json(response).await;
        assert_eq!(body["data"]["status"], "rejected");
        assert_eq!(body["data"]["rejectionReason"], "incomplete docs");

        let response = make_request(
            None,
            ctx.app(),
            Method::POST,
            "/ngo/login",
            json!({ "email": "a@x.org", "password": ctx.delivered_password("a@x.org") }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = read_json(response).await;
        assert_eq!(body["error"], "not_approved");
    }

    #[tokio::test]
    async fn test_reject_without_reason() {
        let ctx = TestContext::new();
        let response = make_request(None, ctx.app(), Method::POST, "/ngo/register", registration("a@x.org", "REG-1")).await;
        let receipt: ApiResponse<Receipt> = read_json(response).await;
        let id = receipt.data.unwrap().registration_id;

        let response = make_request(Some(&ctx.admin_token()), ctx.app(), Method::PATCH, &format!("/ngo/{id}/reject"), String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = read_json(response).await;
        assert_eq!(body["data"]["status"], "rejected");
        assert!(body["data"].get("rejectionReason").is_none());

        let response = make_request(
            Some(&ctx.admin_token()),
            ctx.app(),
            Method::PATCH,
            &format!("/ngo/{id}/reject"),
            json!({ "reason": "x".repeat(501) }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_json(response).await;
        assert_eq!(body["errors"][0]["field"], "reason");
    }

    #[tokio::test]
    async fn test_failed_approval_notification() {
        let ctx = TestContext::new();
        let response = make_request(None, ctx.app(), Method::POST, "/ngo/register", registration("a@x.org", "REG-1")).await;
        let receipt: ApiResponse<Receipt> = read_json(response).await;
        let id = receipt.data.unwrap().registration_id;

        ctx.notifier.fail(true);
        let response = make_request(Some(&ctx.admin_token()), ctx.app(), Method::PATCH, &format!("/ngo/{id}/approve"), String::new()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = read_json(response).await;
        assert_eq!(body["error"], "notification_failure");

        let response = make_request(None, ctx.app(), Method::GET, &format!("/ngo/status/{id}"), String::new()).await;
        let body: Value = read_json(response).await;
        assert_eq!(body["data"]["status"], "pending");
    }
}

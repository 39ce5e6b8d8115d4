//! Volunteer roster of the calling NGO.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get};

use crate::AppState;
use crate::error::Result;
use crate::middleware::{ApprovedNgo, authenticate, require_approved};
use crate::router::{ApiResponse, Valid, parse_id};
use crate::volunteer::{NewVolunteer, Volunteer};

async fn add(
    State(state): State<AppState>,
    ngo: ApprovedNgo,
    Valid(body): Valid<NewVolunteer>,
) -> Result<(StatusCode, ApiResponse<Volunteer>)> {
    let volunteer = state.volunteers.add(ngo.id, &ngo.name, body).await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::data(volunteer).message("Volunteer added successfully."),
    ))
}

async fn list(
    State(state): State<AppState>,
    ngo: ApprovedNgo,
) -> Result<ApiResponse<Vec<Volunteer>>> {
    Ok(ApiResponse::data(state.volunteers.list(ngo.id).await?))
}

async fn remove(
    State(state): State<AppState>,
    ngo: ApprovedNgo,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>> {
    state.volunteers.delete(ngo.id, parse_id(&id)?).await?;
    Ok(ApiResponse::ok("Volunteer deleted successfully."))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(add))
        .route("/{id}", delete(remove))
        .route_layer(from_fn(require_approved))
        .route_layer(from_fn_with_state(state, authenticate))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::{Value, json};

    use super::*;
    use crate::router::tests::read_json;
    use crate::{TestContext, make_request};

    fn volunteer(email: &str) -> String {
        json!({ "name": "Vik", "email": email }).to_string()
    }

    #[tokio::test]
    async fn test_only_approved_ngos() {
        let ctx = TestContext::new();

        let response = make_request(None, ctx.app(), Method::GET, "/volunteers", String::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(
            Some(&ctx.admin_token()),
            ctx.app(),
            Method::GET,
            "/volunteers",
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // A token issued before rejection stops working for volunteers.
        let id = ctx.approved_ngo("a@x.org", "REG-1").await;
        let token = ctx.ngo_token(id);
        ctx.state.ngos.reject(id, Some("fraud".into())).await.unwrap();
        let response = make_request(Some(&token), ctx.app(), Method::GET, "/volunteers", String::new()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_scoped_roster() {
        let ctx = TestContext::new();
        let paws = ctx.approved_ngo("a@x.org", "REG-1").await;
        let claws = ctx.approved_ngo("b@x.org", "REG-2").await;
        let (paws, claws) = (ctx.ngo_token(paws), ctx.ngo_token(claws));

        let response = make_request(Some(&paws), ctx.app(), Method::POST, "/volunteers", volunteer("v@y.org")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = read_json(response).await;
        let id = body["data"]["id"].as_str().unwrap().to_owned();
        assert!(body["data"].get("password").is_none());

        let response = make_request(Some(&claws), ctx.app(), Method::POST, "/volunteers", volunteer("v@y.org")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_json(response).await;
        assert_eq!(body["error"], "duplicate_email");

        // Volunteer and NGO emails live in separate namespaces.
        let registration = json!({
            "name": "Vik's Shelter",
            "email": "v@y.org",
            "phone": "+91 98765 43210",
            "registrationNumber": "REG-3",
            "organizationType": "Animal Welfare",
            "contactPerson": { "name": "Vik", "phone": "9876543210", "email": "v@y.org" },
            "address": { "city": "Pune", "state": "Maharashtra", "postalCode": "411001" },
            "focusAreas": ["rescue"],
            "documents": { "registrationCertificate": "https://docs.example.org/reg.pdf" }
        });
        let response = make_request(None, ctx.app(), Method::POST, "/ngo/register", registration.to_string()).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = make_request(Some(&claws), ctx.app(), Method::GET, "/volunteers", String::new()).await;
        let body: Value = read_json(response).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let response = make_request(Some(&claws), ctx.app(), Method::DELETE, &format!("/volunteers/{id}"), String::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = make_request(Some(&paws), ctx.app(), Method::DELETE, &format!("/volunteers/{id}"), String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(Some(&paws), ctx.app(), Method::GET, "/volunteers", String::new()).await;
        let body: Value = read_json(response).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_volunteer() {
        let ctx = TestContext::new();
        let token = ctx.ngo_token(ctx.approved_ngo("a@x.org", "REG-1").await);

        let response = make_request(Some(&token), ctx.app(), Method::POST, "/volunteers", volunteer("nope")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_json(response).await;
        assert_eq!(body["errors"][0]["field"], "email");
    }
}

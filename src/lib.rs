//! PashuRakshak registers animal-welfare NGOs, lets administrators vet them
//! and gives approved NGOs a volunteer roster.
#![forbid(unsafe_code)]

pub mod admin;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod mail;
mod middleware;
pub mod ngo;
mod router;
pub mod telemetry;
pub mod token;
pub mod volunteer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::admin::AdminDirectory;
use crate::crypto::PasswordManager;
use crate::database::{Database, Repositories};
use crate::mail::{MailManager, NotificationGateway, Notifier};
use crate::middleware::Authenticator;
use crate::ngo::NgoService;
use crate::token::TokenManager;
use crate::volunteer::VolunteerService;

/// Environment variable pointing at the `config.yaml` file.
const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub token: TokenManager,
    pub auth: Authenticator,
    pub ngos: NgoService,
    pub volunteers: VolunteerService,
    pub admins: AdminDirectory,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire services on top of `repositories`.
    pub fn new(
        config: Arc<config::Configuration>,
        repositories: Repositories,
        notifier: Arc<dyn Notifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let passwords = Arc::new(PasswordManager::new(config.argon2.clone())?);

        let secret = config.token_secret()?;
        let mut token = TokenManager::new(config.issuer(), secret.as_bytes());
        if let Some(ttl) = config.token.as_ref().and_then(|token| token.ttl) {
            token = token.ttl(Duration::from_secs(ttl));
        }

        let notifications =
            NotificationGateway::new(notifier, config.notification_timeout());

        Ok(Self {
            auth: Authenticator::new(token.clone(), repositories.ngos.clone()),
            ngos: NgoService::new(
                repositories.ngos,
                Arc::clone(&passwords),
                token.clone(),
                notifications.clone(),
            )?,
            volunteers: VolunteerService::new(
                repositories.volunteers,
                Arc::clone(&passwords),
                notifications,
            ),
            admins: AdminDirectory::new(
                &config.admins,
                passwords,
                token.clone(),
            )?,
            token,
            config,
            metrics,
        })
    }
}

fn cors(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| tracing::warn!(%origin, "ignoring invalid CORS origin"))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .vary([header::AUTHORIZATION])
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let server = &state.config.server;

    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, server.request_timeout()))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(cors(&server.allowed_origins));

    Router::new()
        // `GET /` goes to `health`.
        .route("/", get(router::status::health))
        .route("/metrics", get(router::status::metrics))
        .nest("/ngo", router::ngo::router(state.clone()))
        .nest("/admin", router::admin::router(state.clone()))
        .nest("/volunteers", router::volunteers::router(state.clone()))
        .fallback(router::status::not_found)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(DefaultBodyLimit::max(server.body_size_limit))
        .layer(middleware)
        .with_state(state)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let mut config = config::Configuration::default();
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        config = config.path(PathBuf::from(path));
    }
    let config = config.read()?;

    let repositories = match config.postgres {
        Some(ref postgres) => {
            let db = Database::new(postgres).await?;
            // execute migrations scripts on start.
            db.migrate().await?;
            Repositories::postgres(&db)
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, data is kept in memory"
            );
            Repositories::memory()
        },
    };

    // handle mail sender.
    let mail = if let Some(cfg) = &config.mail {
        MailManager::new(cfg).await?
    } else {
        tracing::warn!(
            "missing `mail` entry on `config.yaml` file, approvals cannot deliver credentials"
        );
        MailManager::default()
    };

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "cannot install Prometheus recorder");
            None
        },
    };

    AppState::new(config, repositories, Arc::new(mail), metrics)
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

#[cfg(test)]
pub(crate) const ADMIN_EMAIL: &str = "admin@example.org";
#[cfg(test)]
pub(crate) const ADMIN_PASSWORD: &str = "admin-secret";

/// Application backed by memory storage and a recording notifier.
#[cfg(test)]
pub(crate) struct TestContext {
    pub state: AppState,
    pub notifier: Arc<mail::tests::RecordingNotifier>,
}

#[cfg(test)]
impl TestContext {
    pub fn new() -> Self {
        let argon2 = crypto::cheap_params();
        let password_hash = PasswordManager::new(Some(argon2.clone()))
            .unwrap()
            .hash_password(ADMIN_PASSWORD)
            .unwrap();

        let config = config::Configuration {
            name: "PashuRakshak".into(),
            url: "https://api.example.org/".into(),
            argon2: Some(argon2),
            token: Some(config::Token {
                secret: Some("0123456789abcdef0123456789abcdef".into()),
                ttl: None,
            }),
            mail: Some(config::Mail {
                timeout: Some(1),
                ..Default::default()
            }),
            admins: vec![config::Admin {
                email: ADMIN_EMAIL.into(),
                password_hash,
            }],
            ..Default::default()
        };

        let notifier = Arc::new(mail::tests::RecordingNotifier::default());
        let state = AppState::new(
            Arc::new(config),
            Repositories::memory(),
            notifier.clone(),
            None,
        )
        .unwrap();

        Self { state, notifier }
    }

    pub fn app(&self) -> Router {
        app(self.state.clone())
    }

    pub fn admin_token(&self) -> String {
        self.state.token.issue(ADMIN_EMAIL, token::Role::Admin).unwrap()
    }

    pub fn expired_admin_token(&self) -> String {
        self.state.token.expired(ADMIN_EMAIL, token::Role::Admin)
    }

    pub fn ngo_token(&self, id: ngo::NgoId) -> String {
        self.state.token.issue(&id.to_string(), token::Role::Ngo).unwrap()
    }

    /// Register and approve an NGO.
    pub async fn approved_ngo(
        &self,
        email: &str,
        registration_number: &str,
    ) -> ngo::NgoId {
        let ngo = self
            .state
            .ngos
            .register(ngo::tests::form(email, registration_number))
            .await
            .unwrap();
        self.state.ngos.approve(ngo.id).await.unwrap();
        ngo.id
    }

    /// Temporary password sent on the last approval of `email`.
    pub fn delivered_password(&self, email: &str) -> String {
        ngo::service::tests::delivered_password(&self.notifier, email)
    }
}

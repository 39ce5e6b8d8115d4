//! Error handler and response envelope.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

use crate::crypto::CryptoError;
use crate::token::TokenError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("error parsing form data")]
    ParsingForm(Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("an NGO with this {} already exists", .fields.join(", "))]
    DuplicateRegistration { fields: Vec<&'static str> },

    #[error("a volunteer with this email already exists")]
    DuplicateEmail,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("registration is not approved")]
    NotApproved,

    #[error("missing or invalid 'Authorization' header")]
    Unauthorized,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("you do not have permission to perform this action")]
    Forbidden,

    #[error("resource not found")]
    NotFound,

    #[error("notification could not be delivered, please try again")]
    NotificationFailure,

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    pub fn internal(details: impl Into<String>) -> Self {
        Self::Internal {
            details: details.into(),
            source: None,
        }
    }

    /// Machine readable kind, stable across messages.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Validation(_)
            | ServerError::ParsingForm(_)
            | ServerError::Axum(_) => "validation_error",
            ServerError::DuplicateRegistration { .. } => {
                "duplicate_registration"
            },
            ServerError::DuplicateEmail => "duplicate_email",
            ServerError::InvalidCredentials => "invalid_credentials",
            ServerError::NotApproved => "not_approved",
            ServerError::Unauthorized => "unauthorized",
            ServerError::Token(TokenError::Expired) => "token_expired",
            ServerError::Token(TokenError::Invalid(_)) => "token_invalid",
            ServerError::Forbidden => "forbidden",
            ServerError::NotFound => "not_found",
            ServerError::NotificationFailure => "notification_failure",
            ServerError::Conflict(_) => "conflict",
            ServerError::Sql(_)
            | ServerError::Crypto(_)
            | ServerError::Token(TokenError::Encoding(_))
            | ServerError::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status matching the error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_)
            | ServerError::ParsingForm(_)
            | ServerError::Axum(_)
            | ServerError::DuplicateRegistration { .. }
            | ServerError::DuplicateEmail
            | ServerError::Conflict(_) => StatusCode::BAD_REQUEST,
            ServerError::InvalidCredentials
            | ServerError::Unauthorized
            | ServerError::Token(TokenError::Expired)
            | ServerError::Token(TokenError::Invalid(_)) => {
                StatusCode::UNAUTHORIZED
            },
            ServerError::NotApproved | ServerError::Forbidden => {
                StatusCode::FORBIDDEN
            },
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::NotificationFailure
            | ServerError::Sql(_)
            | ServerError::Crypto(_)
            | ServerError::Token(TokenError::Encoding(_))
            | ServerError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

/// Structure for error responses, shaped like every other response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseError {
    success: bool,
    message: String,
    error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
    #[serde(skip)]
    status: u16,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `message` field.
    pub fn message(mut self, message: &str) -> Self {
        self.message = message.into();
        self
    }

    /// Update `error` field.
    pub fn kind(mut self, kind: &str) -> Self {
        self.error = kind.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Machine readable kind.
    pub fn error(&self) -> &str {
        &self.error
    }

    /// Field-level validation failures.
    pub fn field_errors(&self) -> &[FieldError] {
        self.errors.as_deref().unwrap_or_default()
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            success: false,
            message: "Internal server error.".to_owned(),
            error: "internal_error".to_owned(),
            errors: None,
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = Vec::new();
    collect_field_errors(errors, None, &mut fields);
    fields
}

fn collect_field_errors(
    errors: &ValidationErrors,
    prefix: Option<&str>,
    out: &mut Vec<FieldError>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{field}"),
            None => field.to_string(),
        };

        match kind {
            ValidationErrorsKind::Field(issues) => {
                out.extend(issues.iter().map(|issue| FieldError {
                    field: path.clone(),
                    message: issue
                        .message
                        .as_ref()
                        .map(|message| message.to_string())
                        .unwrap_or_else(|| issue.code.to_string()),
                }))
            },
            ValidationErrorsKind::Struct(nested) => {
                collect_field_errors(nested, Some(&path), out)
            },
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_field_errors(
                        nested,
                        Some(&format!("{path}[{index}]")),
                        out,
                    )
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .message(&self.to_string())
            .kind(self.code())
            .status(self.status());

        let response = match &self {
            ServerError::Validation(validation_errors) => response
                .message("There were validation errors with your request.")
                .errors(validation_errors),

            ServerError::ParsingForm(err) => {
                response.message(&format!("Invalid body: {err}"))
            },

            ServerError::Axum(rejection) => response
                .message(&rejection.body_text())
                .status(rejection.status()),

            ServerError::Sql(err) => {
                tracing::error!(error = %err, "SQL request failed");
                ResponseError::default()
            },

            ServerError::Crypto(err) => {
                tracing::error!(error = %err, "cryptographic failure");
                ResponseError::default()
            },

            ServerError::Token(TokenError::Encoding(err)) => {
                tracing::error!(error = %err, "cannot encode token");
                ResponseError::default()
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");
                ResponseError::default()
            },

            _ => response,
        };

        response.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use validator::ValidationError;

    async fn body(response: Response) -> ResponseError {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_envelope() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "email",
            ValidationError::new("email")
                .with_message("Email must be formatted.".into()),
        );

        let response = ServerError::from(errors).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body(response).await;
        assert!(!body.success);
        assert_eq!(body.error(), "validation_error");
        assert_eq!(body.field_errors()[0].field, "email");
        assert_eq!(body.field_errors()[0].message, "Email must be formatted.");
    }

    #[tokio::test]
    async fn test_internal_errors_are_not_leaked() {
        let response = ServerError::internal("db password is hunter2")
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body(response).await;
        assert_eq!(body.message, "Internal server error.");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ServerError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ServerError::Token(TokenError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ServerError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ServerError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServerError::DuplicateRegistration {
                fields: vec!["email", "registrationNumber"]
            }
            .to_string(),
            "an NGO with this email, registrationNumber already exists"
        );
        assert_ne!(
            ServerError::Token(TokenError::Expired).code(),
            ServerError::Token(TokenError::Invalid("bad".into())).code()
        );
    }
}

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::IntoResponse,
};
use engine::{EngineError, FieldErrors};
use serde::Serialize;
use validator::ValidationErrors;

pub use server::{SessionConfig, router, run_with_listener};

mod payload;
mod server;
mod user;

#[derive(Debug)]
pub enum ServerError {
    Engine(EngineError),
    /// Field errors raised before the engine is reached.
    Validation(FieldErrors),
    /// `PUT` on any user other than `me`.
    ForbiddenUpdate,
    NotAuthenticated,
    InvalidToken(&'static str),
    /// Body that is not a JSON object of the expected shape.
    BadRequest(String),
}

/// `{"error": ...}` bodies for the named account failures.
#[derive(Serialize)]
struct Error {
    error: String,
}

/// `{"detail": ...}` bodies for generic failures.
#[derive(Serialize)]
struct Detail {
    detail: String,
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::DuplicateUsername
        | EngineError::AlreadyParticipant
        | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidCredentials => StatusCode::FORBIDDEN,
        EngineError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Password(_) | EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn body_for_engine_error(err: EngineError) -> axum::response::Response {
    let status = status_for_engine_error(&err);
    match err {
        EngineError::Validation(fields) => (status, Json(fields)).into_response(),
        EngineError::KeyNotFound(_) => detail(status, "Not found."),
        EngineError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            detail(status, "internal server error")
        }
        EngineError::Password(reason) => {
            tracing::error!("password hashing error: {reason}");
            detail(status, "internal server error")
        }
        other => (
            status,
            Json(Error {
                error: other.to_string(),
            }),
        )
            .into_response(),
    }
}

fn detail(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(Detail {
            detail: message.to_string(),
        }),
    )
        .into_response()
}

fn unauthorized(message: &str) -> axum::response::Response {
    let mut response = detail(StatusCode::UNAUTHORIZED, message);
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Token"));
    response
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ServerError::Engine(err) => body_for_engine_error(err),
            ServerError::Validation(fields) => (StatusCode::BAD_REQUEST, Json(fields)).into_response(),
            ServerError::ForbiddenUpdate => (
                StatusCode::FORBIDDEN,
                Json(Error {
                    error: "Can't update other Users information".to_string(),
                }),
            )
                .into_response(),
            ServerError::NotAuthenticated => {
                unauthorized("Authentication credentials were not provided.")
            }
            ServerError::InvalidToken(message) => unauthorized(message),
            ServerError::BadRequest(message) => detail(StatusCode::BAD_REQUEST, &message),
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<ValidationErrors> for ServerError {
    fn from(value: ValidationErrors) -> Self {
        let mut fields = FieldErrors::default();
        for (field, errors) in value.field_errors() {
            for err in errors {
                let message = err
                    .message
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| err.code.to_string());
                fields.push(&field, &message);
            }
        }
        Self::Validation(fields)
    }
}

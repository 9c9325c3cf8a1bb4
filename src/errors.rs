use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::perms::RankScope;

pub type AppResult<T> = Result<T, AppError>;
pub type PermsResult<T> = Result<T, PermsError>;

/// Failures of the permission engine itself.
///
/// `Config` and `VitalGroupMissing` are fatal to a load; everything else is
/// recoverable and leaves the served policy untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PermsError {
    #[error("policy document error: {0}")]
    Config(String),
    #[error("{}", vital_group_message(.0))]
    VitalGroupMissing(String),
    #[error("there is already a {scope} rank called {name}")]
    DuplicateRank { scope: RankScope, name: String },
    #[error("there is no {scope} rank called {name}")]
    UnknownRank { scope: RankScope, name: String },
    #[error("invalid rank name: {0:?}")]
    InvalidRankName(String),
    #[error("unknown rank scope: {0}")]
    UnknownScope(String),
    #[error("group not found: {0}")]
    UnknownGroup(String),
    #[error("group {group} already has node {node}")]
    NodeAlreadyPresent { group: String, node: String },
    #[error("group {group} doesn't have node {node}")]
    NodeNotPresent { group: String, node: String },
    #[error("principal directory error: {0}")]
    Directory(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl PermsError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory(message.into())
    }

    /// Whether the error should abort a load / force degraded mode.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PermsError::Config(_) | PermsError::VitalGroupMissing(_))
    }
}

fn vital_group_message(group: &str) -> String {
    match group.split_once('.') {
        Some((section, name)) => format!(
            "the policy document's {section} section is missing the {name} group ({group}). Maybe you renamed it?"
        ),
        None => format!("the policy document is missing the {group} group. Maybe you renamed it?"),
    }
}

/// Raised by an authorization backend while replacing or recalculating a
/// session's permissions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("authorization backend error: {0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = self.to_string();
        let error = match &self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration",
            AppError::Token(_) => "token",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        };

        let payload = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(payload)).into_response()
    }
}

impl From<PermsError> for AppError {
    fn from(value: PermsError) -> Self {
        let message = value.to_string();
        match value {
            PermsError::Config(_) | PermsError::VitalGroupMissing(_) => Self::Configuration(message),
            PermsError::DuplicateRank { .. } | PermsError::NodeAlreadyPresent { .. } => Self::Conflict(message),
            PermsError::UnknownRank { .. } | PermsError::UnknownGroup(_) | PermsError::NodeNotPresent { .. } => {
                Self::NotFound(message)
            }
            PermsError::InvalidRankName(_) | PermsError::UnknownScope(_) => Self::BadRequest(message),
            PermsError::Directory(_) | PermsError::Backend(_) => Self::Internal(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

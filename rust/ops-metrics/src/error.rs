use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed")]
    Auth,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("analytics store unavailable")]
    Unavailable(#[source] anyhow::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<clickhouse::error::Error> for ServiceError {
    fn from(err: clickhouse::error::Error) -> Self {
        ServiceError::Internal(anyhow::Error::new(err).context("analytics query failed"))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Auth => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            ServiceError::Internal(source) | ServiceError::Unavailable(source) => {
                error!(error = ?source, "request failed");
            }
            ServiceError::Config(_) => error!(error = %self, "request failed"),
            ServiceError::InvalidRequest(_) | ServiceError::Auth => {}
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

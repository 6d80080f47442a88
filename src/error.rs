use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

/// Handshake authentication failures. All of these close the channel with
/// code 1008 before the session joins anything.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,
    #[error("token could not be decoded")]
    MalformedToken,
    #[error("token does not reference a known user")]
    UnknownIdentity,
    #[error("token has expired")]
    ExpiredToken,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("failed to get or create room")]
    CreateFailed(#[source] PersistenceError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("store conflict")]
    Conflict(#[source] sqlx::Error),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(err),
            _ => Self::Unavailable(Box::new(err)),
        }
    }
}

/// Per-event failures on an open channel. Recovered locally: the event is
/// dropped and the channel stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

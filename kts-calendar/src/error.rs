//! Calendar service errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kts_types::Timestamp;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Protocol(#[from] kts_types::Error),

    #[error("no calendar round at {0}")]
    UnknownRound(Timestamp),

    #[error("no publication at {0}")]
    UnknownPublication(Timestamp),

    #[error("calendar has no rounds yet")]
    EmptyCalendar,

    #[error("round time {attempted} does not follow {last}")]
    RoundOrder { last: Timestamp, attempted: Timestamp },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("{0} endpoint is unavailable")]
    Unavailable(&'static str),

    #[error("aggregator is shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CalendarError>;

impl CalendarError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::UnknownRound(_) | Self::UnknownPublication(_) | Self::EmptyCalendar => {
                StatusCode::NOT_FOUND
            }
            Self::Unavailable(_) | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::RoundOrder { .. } | Self::Signing(_) | Self::Config(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CalendarError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

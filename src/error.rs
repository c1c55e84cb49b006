use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum MecError {
    /// Malformed clock, message or stored record.
    Parse(String),
    /// Zero good GET replies, or a local store miss.
    NotFound(String),
    /// Fewer acknowledgments than the configured write threshold.
    NotEnoughReplicas(String),
    /// The embedded storage engine failed.
    Store(String),
    /// Peer send/receive failure.
    Transport(String),
    BadRequest(String),
    Config(String),
    Internal(String),
}

impl fmt::Display for MecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MecError::Parse(msg) => write!(f, "Parse error: {}", msg),
            MecError::NotFound(msg) => write!(f, "Not found: {}", msg),
            MecError::NotEnoughReplicas(msg) => write!(f, "Not enough replicas: {}", msg),
            MecError::Store(msg) => write!(f, "Store error: {}", msg),
            MecError::Transport(msg) => write!(f, "Transport error: {}", msg),
            MecError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            MecError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MecError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for MecError {}

impl IntoResponse for MecError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            MecError::Parse(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            MecError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            MecError::NotEnoughReplicas(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            MecError::Store(msg) => {
                tracing::error!("store error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            MecError::Transport(msg) => {
                tracing::error!("transport error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            MecError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            MecError::Config(msg) => {
                tracing::error!("configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            MecError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sled::Error> for MecError {
    fn from(err: sled::Error) -> Self {
        MecError::Store(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MecError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        MecError::Parse(format!("encode: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for MecError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        MecError::Parse(format!("decode: {}", err))
    }
}

pub type MecResult<T> = Result<T, MecError>;

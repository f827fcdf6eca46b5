// Shared state and DTOs for the public API

use std::sync::Arc;

use axum::http::StatusCode;
use changefeed_core::{Changefeed, ChangefeedError, EntityDirectory, StreamKey};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub changefeed: Arc<Changefeed>,
    pub directory: Arc<dyn EntityDirectory>,
}

impl AppState {
    pub fn new(changefeed: Arc<Changefeed>, directory: Arc<dyn EntityDirectory>) -> Self {
        Self {
            changefeed,
            directory,
        }
    }
}

/// Response wrapper for list endpoints.
/// All list endpoints return responses wrapped in a `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// Count response for counters and bulk updates.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    #[schema(example = 3)]
    pub count: u64,
}

/// HTTP status for a core error
pub fn error_status(err: &ChangefeedError) -> StatusCode {
    match err {
        ChangefeedError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChangefeedError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
        ChangefeedError::InvalidStreamKey(_) | ChangefeedError::InvalidInput(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log a failed operation and map it to a status code
pub fn map_error(operation: &'static str) -> impl Fn(ChangefeedError) -> StatusCode {
    move |err| {
        let status = error_status(&err);
        if status.is_server_error() {
            tracing::error!("Failed to {}: {}", operation, err);
        } else {
            tracing::debug!("Rejected {}: {}", operation, err);
        }
        status
    }
}

/// Parse a `<entity_type>:<entity_id>` path segment
pub fn parse_stream_key(raw: &str) -> Result<StreamKey, StatusCode> {
    raw.parse::<StreamKey>().map_err(map_error("parse stream key"))
}

// Mutation intake HTTP routes

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use changefeed_core::RecordedChange;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::common::{map_error, AppState, CountResponse};

/// Request to record a change made by a collaborator
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RecordChangeRequest {
    /// Entity kind, e.g. "repository", "user", "global".
    #[schema(example = "repository")]
    pub entity_type: String,
    /// Entity identifier within its kind.
    #[schema(example = "42")]
    pub entity_id: String,
    /// Mutation name, e.g. "comment_added", "file_updated", "repository_starred".
    #[schema(example = "comment_added")]
    pub action: String,
    /// User who made the change.
    #[schema(example = "u2")]
    pub actor_id: String,
    /// Free-form change details used by notification templates.
    #[serde(default)]
    #[schema(value_type = Object, example = json!({"content": "Looks good"}))]
    pub payload: serde_json::Value,
}

/// Create change intake routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/changes", post(record_change))
        .route("/v1/changes/reconcile", post(reconcile))
        .with_state(state)
}

/// POST /v1/changes - Record a change
///
/// Appends the event to its stream, pushes it to live subscribers and
/// derives notifications.
#[utoipa::path(
    post,
    path = "/v1/changes",
    request_body = RecordChangeRequest,
    responses(
        (status = 201, description = "Change recorded", body = RecordedChange),
        (status = 400, description = "Invalid entity type or id, or a reserved inbox stream or action"),
        (status = 503, description = "Storage unavailable, retry later")
    ),
    tag = "changes"
)]
pub async fn record_change(
    State(state): State<AppState>,
    Json(req): Json<RecordChangeRequest>,
) -> Result<(StatusCode, Json<RecordedChange>), StatusCode> {
    let payload = if req.payload.is_null() {
        json!({})
    } else {
        req.payload
    };

    let recorded = state
        .changefeed
        .record_change(
            &req.entity_type,
            &req.entity_id,
            req.action.as_str(),
            &req.actor_id,
            payload,
        )
        .await
        .map_err(map_error("record change"))?;

    Ok((StatusCode::CREATED, Json(recorded)))
}

/// POST /v1/changes/reconcile - Retry notifications for parked changes
#[utoipa::path(
    post,
    path = "/v1/changes/reconcile",
    responses(
        (status = 200, description = "Notifications created", body = CountResponse),
        (status = 503, description = "Storage still unavailable")
    ),
    tag = "changes"
)]
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<CountResponse>, StatusCode> {
    let created = state
        .changefeed
        .reconcile()
        .await
        .map_err(map_error("reconcile changes"))?;
    Ok(Json(CountResponse {
        count: created as u64,
    }))
}

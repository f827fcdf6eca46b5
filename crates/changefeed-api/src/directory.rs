// Directory HTTP routes
//
// Repositories and user settings are owned by other services; they push the
// facts notification rules need here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::put,
    Json, Router,
};
use changefeed_core::{ChangefeedError, RepositoryRecord, UserSettings};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::common::{map_error, AppState};

/// Request to register or update a repository
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PutRepositoryRequest {
    /// User who owns the repository and receives its notifications.
    #[schema(example = "u1")]
    pub owner_id: String,
    /// Display name used in notification text.
    #[serde(default)]
    #[schema(example = "dotfiles")]
    pub name: String,
}

/// Create directory routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/directory/repositories/:id", put(put_repository))
        .route("/v1/directory/users/:id/settings", put(put_user_settings))
        .with_state(state)
}

/// PUT /v1/directory/repositories/{id} - Register a repository and its owner
#[utoipa::path(
    put,
    path = "/v1/directory/repositories/{id}",
    params(
        ("id" = String, Path, description = "Repository ID")
    ),
    request_body = PutRepositoryRequest,
    responses(
        (status = 200, description = "Repository registered", body = RepositoryRecord),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "directory"
)]
pub async fn put_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PutRepositoryRequest>,
) -> Result<Json<RepositoryRecord>, StatusCode> {
    let repository = RepositoryRecord {
        id,
        owner_id: req.owner_id,
        name: req.name,
    };
    state
        .directory
        .upsert_repository(repository.clone())
        .await
        .map_err(|e| map_error("register repository")(ChangefeedError::from(e)))?;
    tracing::debug!(repository = %repository.id, owner = %repository.owner_id, "Repository registered");
    Ok(Json(repository))
}

/// PUT /v1/directory/users/{id}/settings - Update a user's notification settings
#[utoipa::path(
    put,
    path = "/v1/directory/users/{id}/settings",
    params(
        ("id" = String, Path, description = "User ID")
    ),
    request_body = UserSettings,
    responses(
        (status = 200, description = "Settings stored", body = UserSettings),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "directory"
)]
pub async fn put_user_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(settings): Json<UserSettings>,
) -> Result<Json<UserSettings>, StatusCode> {
    state
        .directory
        .upsert_user_settings(&id, settings.clone())
        .await
        .map_err(|e| map_error("store user settings")(ChangefeedError::from(e)))?;
    Ok(Json(settings))
}

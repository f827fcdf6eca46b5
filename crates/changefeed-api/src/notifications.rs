// Inbox HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use changefeed_core::{ListOptions, Notification};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::common::{map_error, AppState, CountResponse, ListResponse};

/// Query parameters for listing notifications
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListNotificationsQuery {
    /// Only unread notifications.
    #[serde(default)]
    pub unread_only: bool,
    /// Include archived notifications.
    #[serde(default)]
    pub include_archived: bool,
    /// Maximum number of notifications to return, newest first.
    #[param(example = 50)]
    pub limit: Option<usize>,
}

impl From<ListNotificationsQuery> for ListOptions {
    fn from(query: ListNotificationsQuery) -> Self {
        Self {
            unread_only: query.unread_only,
            include_archived: query.include_archived,
            limit: query.limit,
        }
    }
}

/// Create inbox routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/users/:user_id/notifications", get(list_notifications))
        .route(
            "/v1/users/:user_id/notifications/unread-count",
            get(unread_count),
        )
        .route(
            "/v1/users/:user_id/notifications/read-all",
            post(mark_all_read),
        )
        .route("/v1/notifications/:id", get(get_notification))
        .route("/v1/notifications/:id/read", post(mark_read))
        .route("/v1/notifications/:id/archive", post(archive))
        .with_state(state)
}

/// GET /v1/users/{user_id}/notifications - List a user's notifications, newest first
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/notifications",
    params(
        ("user_id" = String, Path, description = "Recipient user ID"),
        ListNotificationsQuery
    ),
    responses(
        (status = 200, description = "Notifications", body = ListResponse<Notification>),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "notifications"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<ListResponse<Notification>>, StatusCode> {
    let notifications = state
        .changefeed
        .list_notifications(&user_id, &query.into())
        .await
        .map_err(map_error("list notifications"))?;

    Ok(Json(ListResponse::new(notifications)))
}

/// GET /v1/users/{user_id}/notifications/unread-count - Count unread notifications
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/notifications/unread-count",
    params(
        ("user_id" = String, Path, description = "Recipient user ID")
    ),
    responses(
        (status = 200, description = "Unread count", body = CountResponse),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "notifications"
)]
pub async fn unread_count(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CountResponse>, StatusCode> {
    let count = state
        .changefeed
        .unread_count(&user_id)
        .await
        .map_err(map_error("count unread notifications"))?;

    Ok(Json(CountResponse { count }))
}

/// POST /v1/users/{user_id}/notifications/read-all - Mark all notifications read
///
/// Notifications that arrive while this runs stay unread.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/notifications/read-all",
    params(
        ("user_id" = String, Path, description = "Recipient user ID")
    ),
    responses(
        (status = 200, description = "Number of notifications marked read", body = CountResponse),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "notifications"
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CountResponse>, StatusCode> {
    let count = state
        .changefeed
        .mark_all_read(&user_id)
        .await
        .map_err(map_error("mark all notifications read"))?;

    Ok(Json(CountResponse { count }))
}

/// GET /v1/notifications/{id} - Get a notification
#[utoipa::path(
    get,
    path = "/v1/notifications/{id}",
    params(
        ("id" = Uuid, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Notification", body = Notification),
        (status = 404, description = "Notification not found")
    ),
    tag = "notifications"
)]
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, StatusCode> {
    let notification = state
        .changefeed
        .get_notification(id)
        .await
        .map_err(map_error("get notification"))?;

    Ok(Json(notification))
}

/// POST /v1/notifications/{id}/read - Mark a notification read
///
/// Marking an already-read notification succeeds and changes nothing.
#[utoipa::path(
    post,
    path = "/v1/notifications/{id}/read",
    params(
        ("id" = Uuid, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Notification marked read", body = Notification),
        (status = 404, description = "Notification not found"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "notifications"
)]
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, StatusCode> {
    let notification = state
        .changefeed
        .mark_read(id)
        .await
        .map_err(map_error("mark notification read"))?;

    Ok(Json(notification))
}

/// POST /v1/notifications/{id}/archive - Archive a notification
#[utoipa::path(
    post,
    path = "/v1/notifications/{id}/archive",
    params(
        ("id" = Uuid, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Notification archived", body = Notification),
        (status = 404, description = "Notification not found"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "notifications"
)]
pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, StatusCode> {
    let notification = state
        .changefeed
        .archive(id)
        .await
        .map_err(map_error("archive notification"))?;

    Ok(Json(notification))
}

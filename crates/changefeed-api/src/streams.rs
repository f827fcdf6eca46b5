// Stream HTTP routes: paged catch-up reads, live SSE feed, redrive
//
// Offset semantics follow the durable stream model:
// - `offset` is the last sequence the client has seen; reads return sequence > offset
// - `next_offset` in responses tells the client where to continue
// - SSE `id` is the sequence number, so `Last-Event-ID` resumes without gaps

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use changefeed_core::{Event, RedriveReport, SubscriptionHandle};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::common::{map_error, parse_stream_key, AppState};

/// Create stream routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/streams/:stream_key/events", get(list_events))
        .route("/v1/streams/:stream_key/sse", get(stream_sse))
        .route("/v1/streams/:stream_key/redrive", post(redrive))
        .with_state(state)
}

// ============================================
// Query Parameters
// ============================================

/// Query parameters for SSE streaming
#[derive(Debug, Deserialize, IntoParams)]
pub struct SseQuery {
    /// Resume after this sequence number. Omit to start at the current head
    /// (no history), unless the `Last-Event-ID` header is present.
    #[param(example = 0)]
    pub offset: Option<i64>,
    /// Client session; all live streams of a session can be closed together.
    pub session_id: Option<String>,
}

/// Query parameters for events list
#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Return events with sequence > offset. Use 0 or omit to start from the beginning.
    #[param(example = 0)]
    pub offset: Option<i64>,
    /// Maximum number of events to return. Defaults to 100 if not specified.
    #[param(example = 100)]
    pub limit: Option<usize>,
}

/// Query parameters for redrive
#[derive(Debug, Deserialize, IntoParams)]
pub struct RedriveQuery {
    /// Replay events with sequence > offset. Use 0 or omit to replay everything.
    #[param(example = 0)]
    pub offset: Option<i64>,
}

// ============================================
// SSE
// ============================================

fn to_sse(event: &Event) -> SseEvent {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default()
        .event(event.action.as_str())
        .data(json)
        .id(event.sequence.to_string())
}

/// Sequence from a reconnecting EventSource
fn last_event_id(headers: &HeaderMap) -> Option<i64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// GET /v1/streams/{stream_key}/sse - Live event feed (SSE)
///
/// Replays history after `offset` (or `Last-Event-ID`), then pushes new events
/// as they are appended. If the client falls too far behind, the stream ends
/// with an `error` event carrying `resume_from`; reconnect with
/// `offset = resume_from - 1` to continue without gaps.
#[utoipa::path(
    get,
    path = "/v1/streams/{stream_key}/sse",
    params(
        ("stream_key" = String, Path, description = "Stream key, e.g. repository:42"),
        SseQuery
    ),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 400, description = "Invalid stream key"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "streams"
)]
pub async fn stream_sse(
    State(state): State<AppState>,
    Path(stream_key): Path<String>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    let stream_key = parse_stream_key(&stream_key)?;
    let offset = query.offset.or_else(|| last_event_id(&headers));
    let session_id = query
        .session_id
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let handle = state
        .changefeed
        .open_stream(&session_id, stream_key.clone(), offset.map(|o| o.max(0).saturating_add(1)))
        .await
        .map_err(map_error("open stream"))?;
    tracing::info!(stream = %stream_key, session_id = %session_id, ?offset, "Starting event stream");

    // Dropping the stream (client gone) drops the handle, which unsubscribes
    let stream = stream::unfold(Some(handle), |handle: Option<SubscriptionHandle>| async move {
        let mut handle = handle?;
        match handle.next().await {
            Some(Ok(event)) => Some((Ok(to_sse(&event)), Some(handle))),
            Some(Err(err)) => {
                tracing::warn!(stream = %handle.stream_key(), error = %err, "Ending event stream");
                let data = json!({
                    "error": err.to_string(),
                    "resume_from": handle.resume_from(),
                });
                Some((Ok(SseEvent::default().event("error").data(data.to_string())), None))
            }
            None => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============================================
// List Events (JSON response for polling)
// ============================================

/// Paginated response for events list with offset-based resumption.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventsResponse {
    /// Array of events.
    pub data: Vec<Event>,
    /// Next offset to use for pagination. Pass this as `?offset=` to get the next page.
    /// If null, there are no more events (you've caught up).
    pub next_offset: Option<i64>,
    /// Whether more events may be available beyond this page.
    pub has_more: bool,
}

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// GET /v1/streams/{stream_key}/events - List events (JSON)
///
/// Supports offset-based pagination for durable stream semantics:
/// - Use `?offset=N` to get events with sequence > N
/// - Use `?limit=M` to limit the number of events returned
/// - Response includes `next_offset` for the next page
///
/// Pages behind the tail never change, so they are marked cacheable.
#[utoipa::path(
    get,
    path = "/v1/streams/{stream_key}/events",
    params(
        ("stream_key" = String, Path, description = "Stream key, e.g. repository:42"),
        EventsQuery
    ),
    responses(
        (status = 200, description = "Events list with pagination info", body = EventsResponse),
        (status = 400, description = "Invalid stream key"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "streams"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(stream_key): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let stream_key = parse_stream_key(&stream_key)?;
    let offset = query.offset.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    // Fetch limit+1 to detect has_more
    let mut events = state
        .changefeed
        .bus()
        .read_page(&stream_key, offset.saturating_add(1), limit + 1)
        .await
        .map_err(map_error("list events"))?;

    let has_more = events.len() > limit;
    events.truncate(limit);
    let next_offset = events.last().map(|e| e.sequence);

    let cache_control = if has_more {
        // Historical page: events are immutable
        "public, max-age=31536000, immutable"
    } else {
        // Live tail - don't cache
        "no-cache"
    };

    let response = EventsResponse {
        data: events,
        next_offset,
        has_more,
    };
    Ok(([(header::CACHE_CONTROL, cache_control)], Json(response)))
}

// ============================================
// Redrive
// ============================================

/// POST /v1/streams/{stream_key}/redrive - Replay stored events through the notification rules
///
/// Idempotent: notifications that already exist are not created again.
#[utoipa::path(
    post,
    path = "/v1/streams/{stream_key}/redrive",
    params(
        ("stream_key" = String, Path, description = "Stream key, e.g. repository:42"),
        RedriveQuery
    ),
    responses(
        (status = 200, description = "Redrive finished", body = RedriveReport),
        (status = 400, description = "Invalid stream key"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "streams"
)]
pub async fn redrive(
    State(state): State<AppState>,
    Path(stream_key): Path<String>,
    Query(query): Query<RedriveQuery>,
) -> Result<Json<RedriveReport>, StatusCode> {
    let stream_key = parse_stream_key(&stream_key)?;
    let from = query.offset.unwrap_or(0).max(0).saturating_add(1);
    let report = state
        .changefeed
        .redrive(&stream_key, from)
        .await
        .map_err(map_error("redrive stream"))?;
    Ok(Json(report))
}

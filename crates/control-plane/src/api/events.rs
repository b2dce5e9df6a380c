// Event ingestion HTTP routes

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hookline_core::WebhookEventType;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse, ListResponse};
use super::AppState;

/// Source recorded when the request does not name one
pub const DEFAULT_EVENT_SOURCE: &str = "api";

/// Request to raise an event
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RaiseEventRequest {
    /// Event type from the catalog.
    #[serde(rename = "type")]
    #[schema(example = "user.created")]
    pub event_type: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    #[schema(value_type = Object, example = json!({"user_id": 42}))]
    pub payload: serde_json::Value,
    /// Component raising the event.
    #[serde(default)]
    #[schema(example = "accounts")]
    pub source: Option<String>,
}

/// Accepted event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RaiseEventResponse {
    pub event_id: Uuid,
}

/// Create event routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/events", post(raise_event))
        .route("/v1/event-types", get(list_event_types))
        .with_state(state)
}

/// POST /v1/events - Raise an event for delivery
///
/// Returns as soon as the event type is validated; deliveries run in the background.
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = RaiseEventRequest,
    responses(
        (status = 202, description = "Event accepted", body = RaiseEventResponse),
        (status = 400, description = "Unknown event type", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn raise_event(
    State(state): State<AppState>,
    Json(req): Json<RaiseEventRequest>,
) -> ApiResult<(StatusCode, Json<RaiseEventResponse>)> {
    let source = req.source.as_deref().unwrap_or(DEFAULT_EVENT_SOURCE);
    let event_id = state
        .engine
        .raise_event(&req.event_type, req.payload, source)?;
    Ok((StatusCode::ACCEPTED, Json(RaiseEventResponse { event_id })))
}

/// GET /v1/event-types - Catalog of event types
#[utoipa::path(
    get,
    path = "/v1/event-types",
    responses(
        (status = 200, description = "Known event types", body = ListResponse<WebhookEventType>)
    ),
    tag = "events"
)]
pub async fn list_event_types() -> Json<ListResponse<WebhookEventType>> {
    Json(ListResponse::new(WebhookEventType::all().to_vec()))
}

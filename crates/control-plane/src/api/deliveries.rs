// Delivery history HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hookline_core::{Delivery, Page};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse, ListResponse};
use super::AppState;

/// Query parameters for listing deliveries
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListDeliveriesQuery {
    /// Only deliveries of this subscription
    #[serde(default)]
    pub subscription_id: Option<Uuid>,
    /// Maximum number of deliveries to return (1-1000, default 100)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Number of deliveries to skip
    #[serde(default)]
    pub offset: Option<usize>,
}

impl ListDeliveriesQuery {
    fn page(&self) -> Page {
        Page::new(
            self.limit.unwrap_or(Page::DEFAULT_LIMIT),
            self.offset.unwrap_or_default(),
        )
    }
}

/// Create delivery routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/deliveries", get(list_deliveries))
        .route("/v1/deliveries/:delivery_id", get(get_delivery))
        .route("/v1/deliveries/:delivery_id/retry", post(retry_delivery))
        .with_state(state)
}

/// GET /v1/deliveries - Delivery history, newest first
#[utoipa::path(
    get,
    path = "/v1/deliveries",
    params(ListDeliveriesQuery),
    responses(
        (status = 200, description = "Delivery history", body = ListResponse<Delivery>),
        (status = 500, description = "Internal server error")
    ),
    tag = "deliveries"
)]
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<ListResponse<Delivery>>> {
    let deliveries = state
        .engine
        .delivery_history(query.subscription_id, query.page())
        .await?;
    Ok(Json(ListResponse::new(deliveries)))
}

/// GET /v1/deliveries/{delivery_id} - Get a delivery
#[utoipa::path(
    get,
    path = "/v1/deliveries/{delivery_id}",
    params(
        ("delivery_id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 200, description = "Delivery found", body = Delivery),
        (status = 404, description = "Delivery not found", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "deliveries"
)]
pub async fn get_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<Json<Delivery>> {
    Ok(Json(state.engine.get_delivery(delivery_id).await?))
}

/// POST /v1/deliveries/{delivery_id}/retry - Manually retry a failed delivery
///
/// Creates a new delivery linked through `retry_of` and makes one attempt.
#[utoipa::path(
    post,
    path = "/v1/deliveries/{delivery_id}/retry",
    params(
        ("delivery_id" = Uuid, Path, description = "Failed delivery ID")
    ),
    responses(
        (status = 201, description = "Retry delivery created", body = Delivery),
        (status = 404, description = "Delivery, subscription or event not found", body = ErrorResponse),
        (status = 409, description = "Delivery is not in the failed state", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "deliveries"
)]
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Delivery>)> {
    let delivery = state.engine.retry_delivery(delivery_id).await?;
    Ok((StatusCode::CREATED, Json(delivery)))
}

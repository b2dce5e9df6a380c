// Subscription HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hookline_core::{Delivery, NewSubscription, Subscription, SubscriptionUpdate};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{ApiError, ApiResult, ErrorResponse, ListResponse};
use super::AppState;

/// Subscription as returned by the API.
///
/// The signing secret is only included in the response to creation; afterwards
/// only `secret_hint` is shown.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    #[serde(flatten)]
    pub subscription: Subscription,
    /// Masked secret, e.g. `whsec_****9f2a`.
    #[schema(example = "whsec_****9f2a")]
    pub secret_hint: String,
    /// Full signing secret. Present only when the subscription was just created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl SubscriptionResponse {
    fn masked(subscription: Subscription) -> Self {
        Self {
            secret_hint: subscription.secret_hint(),
            secret: None,
            subscription,
        }
    }

    fn with_secret(subscription: Subscription) -> Self {
        Self {
            secret_hint: subscription.secret_hint(),
            secret: Some(subscription.secret.clone()),
            subscription,
        }
    }
}

/// Create subscription routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/subscriptions",
            post(create_subscription).get(list_subscriptions),
        )
        .route(
            "/v1/subscriptions/:subscription_id",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        .route(
            "/v1/subscriptions/:subscription_id/test",
            post(test_subscription),
        )
        .route(
            "/v1/subscriptions/:subscription_id/reset",
            post(reset_subscription),
        )
        .with_state(state)
}

/// POST /v1/subscriptions - Register a subscription
#[utoipa::path(
    post,
    path = "/v1/subscriptions",
    request_body = NewSubscription,
    responses(
        (status = 201, description = "Subscription created", body = SubscriptionResponse),
        (status = 400, description = "Invalid subscription", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "subscriptions"
)]
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<SubscriptionResponse>)> {
    let subscription = state.engine.register_subscription(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse::with_secret(subscription)),
    ))
}

/// GET /v1/subscriptions - List subscriptions
#[utoipa::path(
    get,
    path = "/v1/subscriptions",
    responses(
        (status = 200, description = "List of subscriptions", body = ListResponse<SubscriptionResponse>),
        (status = 500, description = "Internal server error")
    ),
    tag = "subscriptions"
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
) -> ApiResult<Json<ListResponse<SubscriptionResponse>>> {
    let subscriptions = state.engine.list_subscriptions().await?;
    Ok(Json(ListResponse::new(
        subscriptions
            .into_iter()
            .map(SubscriptionResponse::masked)
            .collect(),
    )))
}

/// GET /v1/subscriptions/{subscription_id} - Get a subscription
#[utoipa::path(
    get,
    path = "/v1/subscriptions/{subscription_id}",
    params(
        ("subscription_id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Subscription found", body = SubscriptionResponse),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "subscriptions"
)]
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state.engine.get_subscription(subscription_id).await?;
    Ok(Json(SubscriptionResponse::masked(subscription)))
}

/// PATCH /v1/subscriptions/{subscription_id} - Update a subscription
#[utoipa::path(
    patch,
    path = "/v1/subscriptions/{subscription_id}",
    params(
        ("subscription_id" = Uuid, Path, description = "Subscription ID")
    ),
    request_body = SubscriptionUpdate,
    responses(
        (status = 200, description = "Subscription updated", body = SubscriptionResponse),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "subscriptions"
)]
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<SubscriptionUpdate>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state
        .engine
        .update_subscription(subscription_id, req)
        .await?;
    Ok(Json(SubscriptionResponse::masked(subscription)))
}

/// DELETE /v1/subscriptions/{subscription_id} - Delete a subscription
#[utoipa::path(
    delete,
    path = "/v1/subscriptions/{subscription_id}",
    params(
        ("subscription_id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 204, description = "Subscription deleted"),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "subscriptions"
)]
pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.engine.delete_subscription(subscription_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "subscription not found: {subscription_id}"
        )))
    }
}

/// POST /v1/subscriptions/{subscription_id}/test - Send a single test delivery
#[utoipa::path(
    post,
    path = "/v1/subscriptions/{subscription_id}/test",
    params(
        ("subscription_id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Test delivery result (success or failed)", body = Delivery),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "subscriptions"
)]
pub async fn test_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<Delivery>> {
    let delivery = state.engine.test_subscription(subscription_id).await?;
    Ok(Json(delivery))
}

/// POST /v1/subscriptions/{subscription_id}/reset - Zero delivery counters
#[utoipa::path(
    post,
    path = "/v1/subscriptions/{subscription_id}/reset",
    params(
        ("subscription_id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Counters reset", body = SubscriptionResponse),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "subscriptions"
)]
pub async fn reset_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state
        .engine
        .reset_subscription_counters(subscription_id)
        .await?;
    Ok(Json(SubscriptionResponse::masked(subscription)))
}

// HTTP API routes
//
// This module contains all HTTP route handlers for the public API.
// Each submodule handles one resource and exposes a `routes(state)` constructor.

pub mod common;
pub mod deliveries;
pub mod events;
pub mod settings;
pub mod stats;
pub mod subscriptions;

use axum::Router;
use hookline_core::WebhookEngine;

// Re-export common types
pub use common::{ApiError, ApiResult, ErrorResponse, ListResponse};

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub engine: WebhookEngine,
}

impl AppState {
    pub fn new(engine: WebhookEngine) -> Self {
        Self { engine }
    }
}

/// All `/v1` routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .merge(subscriptions::routes(state.clone()))
        .merge(deliveries::routes(state.clone()))
        .merge(events::routes(state.clone()))
        .merge(stats::routes(state.clone()))
        .merge(settings::routes(state))
}

// OpenAPI document generation
//
// Used by both the API server (for Swagger UI) and the export-openapi binary
// (for static document generation).

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use hookline_core::{
    BackoffStrategy, Delivery, DeliveryStatus, Event, IpAllowList, NewSubscription, Settings,
    SettingsUpdate, StatsSummary, SubscriptionUpdate, WebhookEventType,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the Hookline API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::subscriptions::create_subscription,
        api::subscriptions::list_subscriptions,
        api::subscriptions::get_subscription,
        api::subscriptions::update_subscription,
        api::subscriptions::delete_subscription,
        api::subscriptions::test_subscription,
        api::subscriptions::reset_subscription,
        api::deliveries::list_deliveries,
        api::deliveries::get_delivery,
        api::deliveries::retry_delivery,
        api::events::raise_event,
        api::events::list_event_types,
        api::stats::get_stats,
        api::settings::get_settings,
        api::settings::update_settings,
    ),
    components(
        schemas(
            ErrorResponse,
            // Subscriptions
            NewSubscription, SubscriptionUpdate,
            api::subscriptions::SubscriptionResponse,
            ListResponse<api::subscriptions::SubscriptionResponse>,
            // Deliveries
            Delivery, DeliveryStatus,
            api::deliveries::ListDeliveriesQuery,
            ListResponse<Delivery>,
            // Events
            Event, WebhookEventType,
            api::events::RaiseEventRequest, api::events::RaiseEventResponse,
            ListResponse<WebhookEventType>,
            // Stats and settings
            StatsSummary,
            Settings, SettingsUpdate, BackoffStrategy, IpAllowList,
        )
    ),
    tags(
        (name = "subscriptions", description = "Webhook subscription management"),
        (name = "deliveries", description = "Delivery history and manual retries"),
        (name = "events", description = "Event ingestion and the event type catalog"),
        (name = "stats", description = "Delivery statistics"),
        (name = "settings", description = "Engine settings")
    ),
    info(
        title = "Hookline API",
        version = "0.1.0",
        description = "API for managing outbound webhook subscriptions, deliveries and settings",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI document as a pretty-printed JSON string
    pub fn to_json() -> String {
        Self::openapi()
            .to_pretty_json()
            .unwrap_or_else(|e| format!("{{\"error\": \"failed to render OpenAPI document: {e}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc: serde_json::Value = serde_json::from_str(&ApiDoc::to_json()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for path in [
            "/v1/subscriptions",
            "/v1/subscriptions/{subscription_id}",
            "/v1/subscriptions/{subscription_id}/test",
            "/v1/subscriptions/{subscription_id}/reset",
            "/v1/deliveries",
            "/v1/deliveries/{delivery_id}",
            "/v1/deliveries/{delivery_id}/retry",
            "/v1/events",
            "/v1/event-types",
            "/v1/stats",
            "/v1/settings",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
    }
}

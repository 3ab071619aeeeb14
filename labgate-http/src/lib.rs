pub mod api;
pub mod common;
pub mod middleware;

use poem::{Endpoint, EndpointExt, Route};
use poem_openapi::OpenApiService;

use labgate_core::Services;

/// Assemble the HTTP application: OpenAPI routes wrapped by the security
/// middleware chain. Outside-in: request id stamping, then the admission
/// gates (payload cap, IP block, rate limit), then the handlers.
pub fn build_app(services: Services) -> impl Endpoint {
    let api_service = OpenApiService::new(
        (api::auth::Api, api::admin::Api),
        "LabGate",
        env!("CARGO_PKG_VERSION"),
    );

    Route::new()
        .nest("/api", api_service)
        .around(middleware::security_gate)
        .around(middleware::request_boundary)
        .data(services)
}

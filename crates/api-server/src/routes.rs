//! API route definitions.

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{self, health};
use crate::sse;
use crate::state::AppState;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Racefeed API",
        version = "1.0.0",
        description = "Live exchange market updates over server-sent events"
    ),
    paths(health::health_check, sse::stream_handler),
    components(schemas(
        health::HealthResponse,
        crate::error::ErrorResponse,
        sse::ConnectedPayload,
        sse::HeartbeatPayload,
        sse::PricePayload,
        sse::RunnerPayload,
        sse::MarketUpdatePayload,
        sse::ClosedRunnerPayload,
        sse::MarketClosedPayload,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "stream", description = "Market update stream")
    )
)]
pub struct ApiDoc;

/// Create the application router.
pub fn create_router(state: Arc<AppState>, cors_permissive: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/stream", get(sse::stream_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_permissive {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

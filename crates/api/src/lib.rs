//! HTTP API for the toy collection.
//!
//! Exposes toy and profile writes, each executed as a saga by the
//! collection service, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use collection::{CollectionService, SagaOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryBlobStore, InMemoryDocumentStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Collection service over the in-memory stores.
pub type Collection = CollectionService<InMemoryBlobStore, InMemoryDocumentStore>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub collection: Collection,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/toys", post(routes::toys::create))
        .route(
            "/toys/{id}",
            get(routes::toys::get)
                .patch(routes::toys::edit)
                .delete(routes::toys::delete),
        )
        .route(
            "/users/{id}/profile",
            get(routes::profiles::get).put(routes::profiles::update),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state backed by fresh in-memory stores.
pub fn create_default_state(options: SagaOptions) -> Arc<AppState> {
    let collection = CollectionService::new(
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(InMemoryDocumentStore::new()),
    )
    .with_options(options);

    Arc::new(AppState { collection })
}

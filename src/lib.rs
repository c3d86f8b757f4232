//! # Warenhaus Backend Library
//!
//! Core library of Warenhaus, an online-shop backend: product catalog with
//! images, carts and wishlists, orders with stock accounting, discount codes,
//! reviews and payment intents, served as a JSON REST API.
//!
//! ## Architecture
//!
//! - **Axum**: HTTP server and routing
//! - **SQLx**: asynchronous SQLite access
//! - **Tokio**: async runtime
//! - **Serde**: JSON (de)serialization
//!
//! ## Core Components
//!
//! - [`config`]: layered configuration
//! - [`db`]: schema initialization
//! - [`error`]: error type and HTTP error responses
//! - [`money`], [`pricing`], [`checkout`]: pure order and discount arithmetic
//! - [`images`]: product image storage behind the [`images::ImageStore`] trait
//! - [`payments`]: payment intents behind the [`payments::PaymentGateway`] trait
//! - [`cache`]: LRU cache for product details
//! - [`metrics`]: business counters
//! - [`middleware`]: authentication, rate limiting, validation, security headers
//! - [`routes`]: HTTP handlers
//! - [`state`]: shared application state
//! - [`types`]: request/response DTOs and database rows

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tower_http::{compression::CompressionLayer, services::ServeDir, trace::TraceLayer};

pub mod cache;
pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod images;
pub mod metrics;
pub mod middleware;
pub mod money;
pub mod payments;
pub mod pricing;
pub mod routes;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

use state::AppState;

/// The complete application: API routes, media files and the middleware stack.
pub fn build_app(state: AppState) -> Router {
    let cfg = state.config.clone();
    let media = ServeDir::new(&cfg.media.root);

    routes::api_router()
        .nest_service(cfg.media.public_base.trim_end_matches('/'), media)
        .with_state(state)
        .layer(DefaultBodyLimit::max(cfg.max_body_bytes()))
        .layer(from_fn_with_state(cfg.clone(), middleware::validation::validate_request_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg, middleware::security_headers::security_headers_middleware))
}

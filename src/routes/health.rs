use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::fmt::Write as _;

// Liveness, no DB access
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness: DB ping bounded by a timeout
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

// Prometheus text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let series: [(&str, &str, &str, i128); 10] = [
        ("orders_placed", "counter", "Orders placed", m.orders_placed as i128),
        ("orders_cancelled", "counter", "Orders cancelled", m.orders_cancelled as i128),
        ("revenue_cents", "gauge", "Revenue of non-cancelled orders in cents", m.revenue_cents as i128),
        ("discounts_applied", "counter", "Discount codes applied", m.discounts_applied as i128),
        ("payment_intents", "counter", "Payment intents created", m.payment_intents as i128),
        ("refunds", "counter", "Refunds issued", m.refunds as i128),
        ("products_created", "counter", "Products created", m.products_created as i128),
        ("reviews_added", "counter", "Reviews added", m.reviews_added as i128),
        ("images_uploaded", "counter", "Product images uploaded", m.images_uploaded as i128),
        ("uptime_seconds", "gauge", "Uptime seconds", m.uptime_seconds as i128),
    ];
    let mut body = String::new();
    for (name, kind, help, value) in series {
        let _ = write!(
            body,
            "# HELP warenhaus_{name} {help}\n# TYPE warenhaus_{name} {kind}\nwarenhaus_{name} {value}\n"
        );
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}

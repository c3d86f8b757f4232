//! Sliding-window rate limiting, per client IP.
//!
//! A process-wide limiter guards every request; [`EndpointRateLimiter`] adds
//! tighter limits for the expensive write paths (order placement, discount
//! application, payment intents, registration).

use super::ip::extract_ip_from_headers;
use axum::{
    extract::{connect_info::ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// `max_requests` per `window_seconds`, counted per IP.
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    fn live(&self, now: Instant, t: Instant) -> bool {
        // On clock skew keep the timestamp.
        now.checked_duration_since(t).map(|d| d < self.window).unwrap_or(true)
    }

    /// Records the request when allowed; otherwise returns `RateLimited`
    /// with the seconds until the oldest request leaves the window.
    pub async fn check(&self, ip: IpAddr) -> AppResult<()> {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        let timestamps = requests.entry(ip).or_default();
        timestamps.retain(|&t| self.live(now, t));

        if timestamps.len() >= self.max_requests {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = now
                .checked_duration_since(oldest)
                .map(|elapsed| self.window.saturating_sub(elapsed))
                .unwrap_or(Duration::from_secs(1));
            return Err(AppError::RateLimited { retry_after_seconds: retry_after.as_secs().max(1) });
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drops IPs with no request inside the window.
    pub async fn cleanup_old_entries(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, timestamps| {
            timestamps.retain(|&t| self.live(now, t));
            !timestamps.is_empty()
        });
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

lazy_static::lazy_static! {
    // Defaults: 1000 req / 60s, overridable with
    // WARENHAUS_RATE_LIMIT_MAX_REQUESTS and WARENHAUS_RATE_LIMIT_WINDOW_SECONDS.
    static ref GLOBAL_RATE_LIMITER: RateLimiter = RateLimiter::new(
        env_or("WARENHAUS_RATE_LIMIT_MAX_REQUESTS", 1000usize),
        env_or("WARENHAUS_RATE_LIMIT_WINDOW_SECONDS", 60u64),
    );
}

static GLOBAL_CLEANUP_STARTED: OnceLock<()> = OnceLock::new();

/// Global per-IP limit applied to every request.
pub async fn rate_limit_middleware(req: Request, next: Next) -> Response {
    let remote_ip = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
    let ip = extract_ip_from_headers(req.headers(), remote_ip);

    GLOBAL_CLEANUP_STARTED.get_or_init(|| {
        let limiter = GLOBAL_RATE_LIMITER.clone();
        let cleanup_secs = env_or("WARENHAUS_GLOBAL_RATE_LIMIT_CLEANUP_INTERVAL", 600u64).clamp(60, 3600);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(cleanup_secs));
            loop {
                interval.tick().await;
                limiter.cleanup_old_entries().await;
            }
        });
    });

    match GLOBAL_RATE_LIMITER.check(ip).await {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::warn!(%ip, "global rate limit hit");
            e.into_response()
        }
    }
}

/// Named limiters keyed by route, e.g. `"/api/orders"`.
#[derive(Clone, Default)]
pub struct EndpointRateLimiter {
    limiters: Arc<HashMap<String, RateLimiter>>,
}

impl EndpointRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces limits given as `(endpoint, max_requests, window_seconds)`.
    pub fn with_limits(self, limits: Vec<(&str, usize, u64)>) -> Self {
        let mut map = Arc::try_unwrap(self.limiters).unwrap_or_else(|shared| (*shared).clone());
        for (endpoint, max_requests, window_seconds) in limits {
            map.insert(endpoint.to_string(), RateLimiter::new(max_requests, window_seconds));
        }
        Self { limiters: Arc::new(map) }
    }

    /// Endpoints without a configured limit always pass.
    pub async fn check_endpoint_limit(&self, endpoint: &str, ip: IpAddr) -> AppResult<()> {
        match self.limiters.get(endpoint) {
            Some(limiter) => limiter.check(ip).await.inspect_err(|_| {
                tracing::warn!(%ip, endpoint, "endpoint rate limit hit");
            }),
            None => Ok(()),
        }
    }

    /// Resolves the caller IP from proxy headers (falling back to the socket) and checks it.
    pub async fn throttle(&self, endpoint: &str, headers: &HeaderMap, remote: Option<IpAddr>) -> AppResult<()> {
        self.check_endpoint_limit(endpoint, extract_ip_from_headers(headers, remote)).await
    }

    pub async fn cleanup_all(&self) {
        for limiter in self.limiters.values() {
            limiter.cleanup_old_entries().await;
        }
    }
}

use std::sync::Arc;

use crate::cache::ProductCache;
use crate::config::AppConfig;
use crate::images::{ImageStore, LocalImageStore};
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;
use crate::payments::{LedgerGateway, PaymentGateway};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// Tighter limits for the expensive write endpoints.
    pub rate_limiter: EndpointRateLimiter,
    pub images: Arc<dyn ImageStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub product_cache: ProductCache,
}

impl AppState {
    /// State with the local image store under `media.root` and the ledger
    /// gateway over the same pool.
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let images = Arc::new(LocalImageStore::new(
            &config.media.root,
            &config.media.public_base,
            config.media.max_image_bytes,
        ));
        let payments = Arc::new(LedgerGateway::new(db.clone()));
        Self::with_services(db, config, images, payments)
    }

    pub fn with_services(
        db: sqlx::SqlitePool,
        config: AppConfig,
        images: Arc<dyn ImageStore>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("/api/orders", 30, 60),                  // 30 orders per minute
            ("/api/discounts/apply", 60, 60),         // 60 code attempts per minute
            ("/api/payments/create-intent", 30, 60),  // 30 intents per minute
            ("/api/auth/register", 10, 60),           // 10 sign-ups per minute
        ]);
        let product_cache = ProductCache::new(config.catalog.product_cache_capacity);

        Self {
            db,
            config: Arc::new(config),
            metrics: Metrics::new(),
            rate_limiter,
            images,
            payments,
            product_cache,
        }
    }
}

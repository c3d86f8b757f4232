use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Business counters exposed on `/metrics` and `/metrics/prometheus`.
#[derive(Clone)]
pub struct Metrics {
    pub orders_placed: Arc<AtomicU64>,
    pub orders_cancelled: Arc<AtomicU64>,
    pub revenue_cents: Arc<AtomicI64>,
    pub discounts_applied: Arc<AtomicU64>,
    pub payment_intents: Arc<AtomicU64>,
    pub refunds: Arc<AtomicU64>,
    pub products_created: Arc<AtomicU64>,
    pub reviews_added: Arc<AtomicU64>,
    pub images_uploaded: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            orders_placed: Arc::new(AtomicU64::new(0)),
            orders_cancelled: Arc::new(AtomicU64::new(0)),
            revenue_cents: Arc::new(AtomicI64::new(0)),
            discounts_applied: Arc::new(AtomicU64::new(0)),
            payment_intents: Arc::new(AtomicU64::new(0)),
            refunds: Arc::new(AtomicU64::new(0)),
            products_created: Arc::new(AtomicU64::new(0)),
            reviews_added: Arc::new(AtomicU64::new(0)),
            images_uploaded: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_order(&self, total_cents: i64) {
        self.orders_placed.fetch_add(1, Ordering::Relaxed);
        self.revenue_cents.fetch_add(total_cents, Ordering::Relaxed);
    }

    /// Cancelled orders no longer count towards revenue.
    pub fn record_cancellation(&self, total_cents: i64) {
        self.orders_cancelled.fetch_add(1, Ordering::Relaxed);
        self.revenue_cents.fetch_sub(total_cents, Ordering::Relaxed);
    }

    pub fn inc_discounts_applied(&self) {
        self.discounts_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_payment_intents(&self) {
        self.payment_intents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refunds(&self) {
        self.refunds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_products_created(&self) {
        self.products_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reviews_added(&self) {
        self.reviews_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_images(&self, count: u64) {
        self.images_uploaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_placed: self.orders_placed.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            revenue_cents: self.revenue_cents.load(Ordering::Relaxed),
            discounts_applied: self.discounts_applied.load(Ordering::Relaxed),
            payment_intents: self.payment_intents.load(Ordering::Relaxed),
            refunds: self.refunds.load(Ordering::Relaxed),
            products_created: self.products_created.load(Ordering::Relaxed),
            reviews_added: self.reviews_added.load(Ordering::Relaxed),
            images_uploaded: self.images_uploaded.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub orders_placed: u64,
    pub orders_cancelled: u64,
    pub revenue_cents: i64,
    pub discounts_applied: u64,
    pub payment_intents: u64,
    pub refunds: u64,
    pub products_created: u64,
    pub reviews_added: u64,
    pub images_uploaded: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revenue_follows_orders_and_cancellations() {
        let m = Metrics::new();
        m.record_order(2_500);
        m.record_order(1_000);
        m.record_cancellation(1_000);
        let s = m.get_snapshot();
        assert_eq!(s.orders_placed, 2);
        assert_eq!(s.orders_cancelled, 1);
        assert_eq!(s.revenue_cents, 2_500);
    }
}

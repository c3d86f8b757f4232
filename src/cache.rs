use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::types::ProductDetails;

/// Bounded cache of product detail views keyed by product id.
///
/// Every write touching a product (stock, images, reviews, soft delete) must
/// call [`ProductCache::invalidate`] for that id.
#[derive(Clone)]
pub struct ProductCache {
    inner: Arc<Mutex<LruCache<String, ProductDetails>>>,
}

impl ProductCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Arc::new(Mutex::new(LruCache::new(cap))) }
    }

    pub fn get(&self, id: &str) -> Option<ProductDetails> {
        // A poisoned lock only means another request panicked mid-update; treat as a miss.
        self.inner.lock().ok()?.get(id).cloned()
    }

    pub fn put(&self, details: ProductDetails) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(details.id.clone(), details);
        }
    }

    pub fn invalidate(&self, id: &str) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.pop(id);
        }
    }

    pub fn invalidate_many<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        if let Ok(mut cache) = self.inner.lock() {
            for id in ids {
                cache.pop(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

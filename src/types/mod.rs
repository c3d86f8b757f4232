//! Request and response bodies plus the row shapes read back from SQLite.
//!
//! Identifiers coming *in* are typed as [`uuid::Uuid`] so malformed ids are
//! rejected during deserialization. Identifiers read back from the database
//! stay `String`, they were written by us and are already canonical.

pub mod account;
pub mod cart;
pub mod catalog;
pub mod discount;
pub mod order;
pub mod payment;
pub mod review;

pub use account::*;
pub use cart::*;
pub use catalog::*;
pub use discount::*;
pub use order::*;
pub use payment::*;
pub use review::*;

use serde::{Deserialize, Serialize};

/// One page of a larger result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: i64,
    pub total_pages: u32,
    pub has_previous: bool,
    pub has_next: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total_count: i64) -> Self {
        let total_pages = if total_count <= 0 {
            0
        } else {
            ((total_count as u64 + page_size as u64 - 1) / page_size as u64) as u32
        };
        Self {
            items,
            page,
            page_size,
            total_count,
            total_pages,
            has_previous: page > 1,
            has_next: page < total_pages,
        }
    }
}

/// Current UTC time in the text format every timestamp column uses.
pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Canonical text form for a caller-supplied timestamp, comparable with [`now_utc`].
pub fn to_db_time(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

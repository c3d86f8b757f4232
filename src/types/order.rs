use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::auth::Role;

/// Lifecycle of an order.
///
/// ```text
/// Pending -> Confirmed -> Processing -> Shipped
///    \____________\____________\-----> Cancelled -> (soft) deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Shipping details and progress may only be edited once confirmed and before shipping.
    pub fn is_updatable(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Processing)
    }

    /// Targets an admin update may move an order to.
    pub fn is_update_target(&self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::Shipped)
    }

    pub fn is_cancellable_by(&self, role: Role) -> bool {
        match role {
            Role::Admin => matches!(self, OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing),
            Role::Buyer => matches!(self, OrderStatus::Pending),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub shipping_address: String,
    pub shipping_price_cents: i64,
    pub courier_service: String,
    pub tracking_number: String,
    pub total_price_cents: i64,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminOrderRequest {
    pub buyer_id: Uuid,
    #[serde(flatten)]
    pub order: OrderRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateOrderRequest {
    pub status: OrderStatus,
    pub shipping_address: String,
    pub courier_service: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderSort {
    #[default]
    OrderDate,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
    pub sort: Option<OrderSort>,
    pub direction: Option<SortDirection>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderRow {
    pub id: String,
    pub buyer_id: String,
    pub status: String,
    pub shipping_address: String,
    pub shipping_price_cents: i64,
    pub courier_service: String,
    pub tracking_number: String,
    pub total_price_cents: i64,
    pub order_date: String,
    pub shipped_date: Option<String>,
    pub cancelled_date: Option<String>,
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub buyer_id: String,
    pub status: String,
    pub shipping_address: String,
    pub shipping_price_cents: i64,
    pub courier_service: String,
    pub tracking_number: String,
    pub total_price_cents: i64,
    pub order_date: String,
    pub shipped_date: Option<String>,
    pub cancelled_date: Option<String>,
    pub cancellation_reason: Option<String>,
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    pub fn from_row(row: OrderRow, items: Vec<OrderItemResponse>) -> Self {
        Self {
            id: row.id,
            buyer_id: row.buyer_id,
            status: row.status,
            shipping_address: row.shipping_address,
            shipping_price_cents: row.shipping_price_cents,
            courier_service: row.courier_service,
            tracking_number: row.tracking_number,
            total_price_cents: row.total_price_cents,
            order_date: row.order_date,
            shipped_date: row.shipped_date,
            cancelled_date: row.cancelled_date,
            cancellation_reason: row.cancellation_reason,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse("Pending"), Some(OrderStatus::Pending));
        assert_eq!(OrderStatus::parse("lost"), None);
    }

    #[test]
    fn buyers_cancel_only_pending() {
        assert!(OrderStatus::Pending.is_cancellable_by(Role::Buyer));
        assert!(!OrderStatus::Confirmed.is_cancellable_by(Role::Buyer));
        assert!(OrderStatus::Confirmed.is_cancellable_by(Role::Admin));
        assert!(OrderStatus::Processing.is_cancellable_by(Role::Admin));
        assert!(!OrderStatus::Shipped.is_cancellable_by(Role::Admin));
        assert!(!OrderStatus::Cancelled.is_cancellable_by(Role::Admin));
    }

    #[test]
    fn update_guards() {
        assert!(!OrderStatus::Pending.is_updatable());
        assert!(OrderStatus::Confirmed.is_updatable());
        assert!(OrderStatus::Processing.is_updatable());
        assert!(!OrderStatus::Shipped.is_updatable());
        assert!(OrderStatus::Shipped.is_update_target());
        assert!(!OrderStatus::Cancelled.is_update_target());
    }
}

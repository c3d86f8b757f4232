use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is a whole percent in 1..=100.
    Percentage,
    /// `value` is an amount in cents.
    FixedAmount,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Percentage => "percentage",
            DiscountKind::FixedAmount => "fixed_amount",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(DiscountKind::Percentage),
            "fixed_amount" => Some(DiscountKind::FixedAmount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDiscountRequest {
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
    #[serde(default)]
    pub applicable_product_ids: Vec<Uuid>,
    #[serde(default)]
    pub applicable_category_ids: Vec<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDiscountRequest {
    pub kind: DiscountKind,
    pub value: i64,
    #[serde(default)]
    pub applicable_product_ids: Vec<Uuid>,
    #[serde(default)]
    pub applicable_category_ids: Vec<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscountListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DiscountRow {
    pub id: String,
    pub code: String,
    pub kind: String,
    pub value: i64,
    pub applicable_product_ids: String,
    pub applicable_category_ids: String,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
    pub is_deleted: bool,
    pub usage_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountDetails {
    pub id: String,
    pub code: String,
    pub kind: String,
    pub value: i64,
    pub applicable_product_ids: Vec<String>,
    pub applicable_category_ids: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
    pub usage_count: i64,
    /// `Deleted`, `Expired` or `Active`.
    pub status: String,
}

impl DiscountDetails {
    pub fn from_row(row: DiscountRow, now: &str) -> Self {
        let status = if row.is_deleted {
            "Deleted"
        } else if row.end_date.as_str() < now {
            "Expired"
        } else {
            "Active"
        };
        Self {
            id: row.id,
            code: row.code,
            kind: row.kind,
            value: row.value,
            applicable_product_ids: serde_json::from_str(&row.applicable_product_ids).unwrap_or_default(),
            applicable_category_ids: serde_json::from_str(&row.applicable_category_ids).unwrap_or_default(),
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
            usage_count: row.usage_count,
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyDiscountRequest {
    pub code: String,
    pub cart_total_cents: i64,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedDiscount {
    pub code: String,
    pub original_total_cents: i64,
    pub discount_cents: i64,
    pub new_total_cents: i64,
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShippingOption {
    #[default]
    Standard,
    Express,
    Free,
    Pickup,
}

impl ShippingOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingOption::Standard => "standard",
            ShippingOption::Express => "express",
            ShippingOption::Free => "free",
            ShippingOption::Pickup => "pickup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(ShippingOption::Standard),
            "express" => Some(ShippingOption::Express),
            "free" => Some(ShippingOption::Free),
            "pickup" => Some(ShippingOption::Pickup),
            _ => None,
        }
    }
}

/// Product row joined with its category name.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub category_id: String,
    pub category_name: String,
    pub stock_quantity: i64,
    pub shipping_option: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDetails {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub category_id: String,
    pub category_name: String,
    pub stock_quantity: i64,
    pub shipping_option: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
    /// Primary image first.
    pub image_urls: Vec<String>,
    pub average_rating: Option<f64>,
    pub review_count: i64,
}

impl ProductDetails {
    pub fn from_row(row: ProductRow, image_urls: Vec<String>, average_rating: Option<f64>, review_count: i64) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            price_cents: row.price_cents,
            category_id: row.category_id,
            category_name: row.category_name,
            stock_quantity: row.stock_quantity,
            shipping_option: row.shipping_option,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            image_urls,
            average_rating,
            review_count,
        }
    }
}

/// Outcome of a product create call: either a new product or a stock merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCreated {
    pub id: String,
    pub merged: bool,
    pub stock_quantity: i64,
}

/// An uploaded image part, buffered from the multipart body.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Parsed multipart form for product create and update.
#[derive(Debug, Clone, Default)]
pub struct ProductForm {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub category_id: Option<Uuid>,
    pub stock_quantity: Option<i64>,
    pub shipping_option: Option<ShippingOption>,
    pub is_active: Option<bool>,
    pub images: Vec<ImageUpload>,
}

/// List entry: product row plus its primary image.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub category_id: String,
    pub category_name: String,
    pub stock_quantity: i64,
    pub shipping_option: String,
    pub primary_image_url: Option<String>,
}

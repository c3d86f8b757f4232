use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRequest {
    pub product_id: Uuid,
    pub order_id: Uuid,
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReviewResponse {
    pub id: String,
    pub product_id: String,
    pub rating: i64,
    pub comment: String,
    pub buyer_name: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopRatedProduct {
    pub product_id: String,
    pub product_name: String,
    pub average_rating: f64,
    pub reviews_count: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TopRatedQuery {
    pub count: Option<u32>,
}

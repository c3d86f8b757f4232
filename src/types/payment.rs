use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub customer_email: Option<String>,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RefundQuery {
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub message: String,
    pub payment_intent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: String,
    pub buyer_id: String,
    pub order_id: Option<String>,
    pub payment_intent_id: String,
    pub amount_cents: i64,
    pub refunded_cents: i64,
    pub currency: String,
    pub status: String,
}

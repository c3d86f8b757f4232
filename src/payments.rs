//! Payment gateway seam.
//!
//! Handlers only see [`PaymentGateway`]. [`LedgerGateway`] keeps intents in
//! the `ledger_intents` table and settles them immediately on confirm; it is
//! the gateway wired into [`crate::state::AppState`] by default. Because the
//! ledger is durable, intents outlive a restart of the process.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::types::now_utc;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown payment intent {0}")]
    UnknownIntent(String),
    #[error("payment intent {id} is {status}, expected {expected}")]
    InvalidState { id: String, status: &'static str, expected: &'static str },
    #[error("refund of {requested} exceeds refundable {remaining}")]
    RefundExceedsAmount { requested: i64, remaining: i64 },
    #[error("payment intent {0} changed concurrently, retry")]
    Conflict(String),
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment intent {id} has unknown status {status:?}")]
    Corrupt { id: String, status: String },
    #[error("ledger storage: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    RequiresConfirmation,
    Succeeded,
    PartiallyRefunded,
    Refunded,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::PartiallyRefunded => "partially_refunded",
            IntentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requires_confirmation" => Some(IntentStatus::RequiresConfirmation),
            "succeeded" => Some(IntentStatus::Succeeded),
            "partially_refunded" => Some(IntentStatus::PartiallyRefunded),
            "refunded" => Some(IntentStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, IntentStatus::Succeeded | IntentStatus::PartiallyRefunded)
    }
}

#[derive(Debug, Clone)]
pub struct NewIntent {
    pub amount_cents: i64,
    pub currency: String,
    pub description: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub id: String,
    pub client_secret: String,
    pub amount_cents: i64,
    pub refunded_cents: i64,
    pub currency: String,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refund {
    pub amount_cents: i64,
    pub refunded_total_cents: i64,
    pub status: IntentStatus,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: NewIntent) -> Result<Intent, GatewayError>;
    /// Current state as the gateway sees it.
    async fn retrieve(&self, intent_id: &str) -> Result<Intent, GatewayError>;
    async fn confirm(&self, intent_id: &str) -> Result<Intent, GatewayError>;
    /// Refunds `amount_cents`, or whatever is still refundable when `None`.
    async fn refund(&self, intent_id: &str, amount_cents: Option<i64>) -> Result<Refund, GatewayError>;
}

const INTENT_COLUMNS: &str = "id, client_secret, amount_cents, refunded_cents, currency, status";

#[derive(Debug, sqlx::FromRow)]
struct IntentRecord {
    id: String,
    client_secret: String,
    amount_cents: i64,
    refunded_cents: i64,
    currency: String,
    status: String,
}

impl TryFrom<IntentRecord> for Intent {
    type Error = GatewayError;

    fn try_from(r: IntentRecord) -> Result<Self, Self::Error> {
        let status = IntentStatus::parse(&r.status).ok_or_else(|| GatewayError::Corrupt {
            id: r.id.clone(),
            status: r.status.clone(),
        })?;
        Ok(Intent {
            id: r.id,
            client_secret: r.client_secret,
            amount_cents: r.amount_cents,
            refunded_cents: r.refunded_cents,
            currency: r.currency,
            status,
        })
    }
}

/// In-process gateway over the `ledger_intents` table.
///
/// Every state change is a single guarded `UPDATE ... RETURNING`, so two
/// requests racing on one intent cannot both succeed.
#[derive(Clone)]
pub struct LedgerGateway {
    db: SqlitePool,
}

impl LedgerGateway {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PaymentGateway for LedgerGateway {
    async fn create_intent(&self, req: NewIntent) -> Result<Intent, GatewayError> {
        if req.amount_cents <= 0 {
            return Err(GatewayError::Declined("amount must be positive".into()));
        }
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let intent = Intent {
            client_secret: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
            id,
            amount_cents: req.amount_cents,
            refunded_cents: 0,
            currency: req.currency.to_ascii_lowercase(),
            status: IntentStatus::RequiresConfirmation,
        };
        sqlx::query(
            "INSERT INTO ledger_intents(id, client_secret, amount_cents, currency, description, customer_email, status, created_at) \
             VALUES(?,?,?,?,?,?,?,?)",
        )
        .bind(&intent.id)
        .bind(&intent.client_secret)
        .bind(intent.amount_cents)
        .bind(&intent.currency)
        .bind(req.description.as_deref())
        .bind(req.customer_email.as_deref())
        .bind(intent.status.as_str())
        .bind(now_utc())
        .execute(&self.db)
        .await?;
        Ok(intent)
    }

    async fn retrieve(&self, intent_id: &str) -> Result<Intent, GatewayError> {
        sqlx::query_as::<_, IntentRecord>(&format!("SELECT {} FROM ledger_intents WHERE id = ?", INTENT_COLUMNS))
            .bind(intent_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| GatewayError::UnknownIntent(intent_id.to_string()))?
            .try_into()
    }

    async fn confirm(&self, intent_id: &str) -> Result<Intent, GatewayError> {
        let updated = sqlx::query_as::<_, IntentRecord>(&format!(
            "UPDATE ledger_intents SET status = ?, updated_at = ? WHERE id = ? AND status = ? RETURNING {}",
            INTENT_COLUMNS
        ))
        .bind(IntentStatus::Succeeded.as_str())
        .bind(now_utc())
        .bind(intent_id)
        .bind(IntentStatus::RequiresConfirmation.as_str())
        .fetch_optional(&self.db)
        .await?;
        match updated {
            Some(record) => record.try_into(),
            None => {
                let current = self.retrieve(intent_id).await?;
                Err(GatewayError::InvalidState {
                    id: intent_id.to_string(),
                    status: current.status.as_str(),
                    expected: IntentStatus::RequiresConfirmation.as_str(),
                })
            }
        }
    }

    async fn refund(&self, intent_id: &str, amount_cents: Option<i64>) -> Result<Refund, GatewayError> {
        let intent = self.retrieve(intent_id).await?;
        if !intent.status.is_refundable() {
            return Err(GatewayError::InvalidState {
                id: intent_id.to_string(),
                status: intent.status.as_str(),
                expected: IntentStatus::Succeeded.as_str(),
            });
        }
        let remaining = intent.amount_cents - intent.refunded_cents;
        let amount = amount_cents.unwrap_or(remaining);
        if amount <= 0 || amount > remaining {
            return Err(GatewayError::RefundExceedsAmount { requested: amount, remaining });
        }

        let status = if amount == remaining { IntentStatus::Refunded } else { IntentStatus::PartiallyRefunded };
        // Guarded on the refunded total read above; a concurrent refund makes this a no-op.
        let updated: Option<(i64,)> = sqlx::query_as(
            "UPDATE ledger_intents SET refunded_cents = refunded_cents + ?, status = ?, updated_at = ? \
             WHERE id = ? AND refunded_cents = ? AND status IN ('succeeded', 'partially_refunded') \
             RETURNING refunded_cents",
        )
        .bind(amount)
        .bind(status.as_str())
        .bind(now_utc())
        .bind(intent_id)
        .bind(intent.refunded_cents)
        .fetch_optional(&self.db)
        .await?;
        let (refunded_total_cents,) = updated.ok_or_else(|| GatewayError::Conflict(intent_id.to_string()))?;
        Ok(Refund { amount_cents: amount, refunded_total_cents, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::test_pool;

    fn new_intent(amount: i64) -> NewIntent {
        NewIntent { amount_cents: amount, currency: "EGP".into(), description: None, customer_email: None }
    }

    #[tokio::test]
    async fn intent_lifecycle() {
        let gw = LedgerGateway::new(test_pool().await);
        let intent = gw.create_intent(new_intent(5_000)).await.unwrap();
        assert!(intent.id.starts_with("pi_"));
        assert!(intent.client_secret.starts_with(&format!("{}_secret_", intent.id)));
        assert_eq!(intent.currency, "egp");

        // Refund before confirmation is refused.
        assert!(matches!(gw.refund(&intent.id, None).await, Err(GatewayError::InvalidState { .. })));

        let confirmed = gw.confirm(&intent.id).await.unwrap();
        assert_eq!(confirmed.status, IntentStatus::Succeeded);
        assert!(matches!(gw.confirm(&intent.id).await, Err(GatewayError::InvalidState { .. })));

        let r = gw.refund(&intent.id, Some(2_000)).await.unwrap();
        assert_eq!(r.status, IntentStatus::PartiallyRefunded);
        assert!(matches!(
            gw.refund(&intent.id, Some(3_001)).await,
            Err(GatewayError::RefundExceedsAmount { remaining: 3_000, .. })
        ));
        let r = gw.refund(&intent.id, None).await.unwrap();
        assert_eq!(r.amount_cents, 3_000);
        assert_eq!(r.status, IntentStatus::Refunded);
    }

    #[tokio::test]
    async fn unknown_and_declined() {
        let gw = LedgerGateway::new(test_pool().await);
        assert!(matches!(gw.confirm("pi_missing").await, Err(GatewayError::UnknownIntent(_))));
        assert!(matches!(gw.create_intent(new_intent(0)).await, Err(GatewayError::Declined(_))));
    }

    #[tokio::test]
    async fn intents_survive_a_new_gateway() {
        let pool = test_pool().await;
        let intent = LedgerGateway::new(pool.clone()).create_intent(new_intent(1_200)).await.unwrap();

        let restarted = LedgerGateway::new(pool);
        assert_eq!(restarted.retrieve(&intent.id).await.unwrap(), intent);
        let confirmed = restarted.confirm(&intent.id).await.unwrap();
        assert_eq!(confirmed.status, IntentStatus::Succeeded);
        assert_eq!(restarted.retrieve(&intent.id).await.unwrap().status, IntentStatus::Succeeded);
    }
}

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{
        validation::{validate_positive_number, Validator},
        AppError, AppResult, OptionExt,
    },
    middleware::{ip::MaybeRemoteAddr, AdminAuth, BuyerAuth},
    payments::{IntentStatus, NewIntent},
    routes::orders::confirm_pending,
    state::AppState,
    types::{now_utc, OrderStatus, PaymentRequest, PaymentResponse, PaymentRow, RefundQuery},
};

const SELECT_PAYMENT: &str = "SELECT id, buyer_id, order_id, payment_intent_id, amount_cents, refunded_cents, currency, status \
     FROM payments";

fn check_intent_id(raw: &str) -> AppResult<&str> {
    let id = raw.trim();
    let ok = id.starts_with("pi_") && id.len() <= 100 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(id)
    } else {
        Err(AppError::BadRequest("Invalid payment intent id format".into()))
    }
}

async fn fetch(state: &AppState, intent_id: &str) -> AppResult<PaymentRow> {
    sqlx::query_as::<_, PaymentRow>(&format!("{} WHERE payment_intent_id = ?", SELECT_PAYMENT))
        .bind(intent_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Payment")
}

fn current_status(row: &PaymentRow) -> AppResult<IntentStatus> {
    IntentStatus::parse(&row.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("payment {} has unknown status {:?}", row.payment_intent_id, row.status))
    })
}

pub async fn create_intent(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    MaybeRemoteAddr(remote): MaybeRemoteAddr,
    headers: HeaderMap,
    Json(req): Json<PaymentRequest>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.throttle("/api/payments/create-intent", &headers, remote.map(|a| a.ip())).await?;

    let currency = req
        .currency
        .as_deref()
        .map(|c| c.trim().to_ascii_lowercase())
        .unwrap_or_else(|| state.config.payments.default_currency.to_ascii_lowercase());
    let mut v = Validator::new();
    v.check(req.amount_cents > 0, "amount_cents", "Amount must be greater than zero.")
        .check(
            currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()),
            "currency",
            "Currency must be a 3-letter ISO code.",
        );
    if let Some(d) = req.description.as_deref() {
        v.check(d.chars().count() <= 500, "description", "Description must not exceed 500 characters.");
    }
    if let Some(e) = req.customer_email.as_deref() {
        v.check(e.contains('@') && e.len() <= 254, "customer_email", "Customer email is not valid.");
    }
    v.finish()?;

    let buyer_id = buyer.to_string();
    let order_id = req.order_id.map(|o| o.to_string());
    if let Some(oid) = order_id.as_deref() {
        let order: Option<(String, String, i64)> =
            sqlx::query_as("SELECT buyer_id, status, total_price_cents FROM orders WHERE id = ? AND is_deleted = 0")
                .bind(oid)
                .fetch_optional(&state.db)
                .await?;
        let (owner, status, total) = order.ok_or_not_found("Order")?;
        if owner != buyer_id {
            return Err(AppError::Forbidden("You can only pay for your own orders".into()));
        }
        if status == OrderStatus::Cancelled.as_str() {
            return Err(AppError::BadRequest("Cannot pay for a cancelled order".into()));
        }
        if total != req.amount_cents {
            return Err(AppError::ValidationError {
                field: "amount_cents".into(),
                message: format!("Amount must equal the order total ({})", total),
            });
        }
    }

    let intent = state
        .payments
        .create_intent(NewIntent {
            amount_cents: req.amount_cents,
            currency: currency.clone(),
            description: req.description.clone(),
            customer_email: req.customer_email.clone(),
        })
        .await?;

    sqlx::query(
        "INSERT INTO payments(id, buyer_id, order_id, payment_intent_id, client_secret, amount_cents, currency, \
         description, customer_email, status, created_at) VALUES(?,?,?,?,?,?,?,?,?,?,?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&buyer_id)
    .bind(order_id.as_deref())
    .bind(&intent.id)
    .bind(&intent.client_secret)
    .bind(intent.amount_cents)
    .bind(&intent.currency)
    .bind(req.description.as_deref())
    .bind(req.customer_email.as_deref())
    .bind(intent.status.as_str())
    .bind(now_utc())
    .execute(&state.db)
    .await?;

    state.metrics.inc_payment_intents();
    tracing::info!(
        payment_intent_id = %intent.id,
        buyer_id = %buyer_id,
        amount = intent.amount_cents,
        currency = %intent.currency,
        "payment intent created"
    );
    Ok((
        StatusCode::CREATED,
        Json(PaymentResponse {
            success: true,
            message: "Payment intent created.".into(),
            payment_intent_id: intent.id,
            client_secret: Some(intent.client_secret),
        }),
    ))
}

pub async fn confirm_intent(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Path(intent_id): Path<String>,
) -> AppResult<Json<PaymentResponse>> {
    let intent_id = check_intent_id(&intent_id)?;
    let row = fetch(&state, intent_id).await?;
    if row.buyer_id != buyer.to_string() {
        return Err(AppError::NotFound("Payment not found".into()));
    }
    let status = current_status(&row)?;
    if status != IntentStatus::RequiresConfirmation {
        return Err(AppError::BadRequest(format!("Payment is {} and cannot be confirmed", status.as_str())));
    }

    // The gateway is authoritative. An intent it already settled (a previous
    // attempt failed after confirming) is only recorded here.
    let remote = state.payments.retrieve(intent_id).await?;
    let intent = match remote.status {
        IntentStatus::RequiresConfirmation => state.payments.confirm(intent_id).await?,
        IntentStatus::Succeeded => {
            tracing::warn!(payment_intent_id = %intent_id, "intent already succeeded at the gateway, recording it");
            remote
        }
        other => {
            return Err(AppError::BadRequest(format!("Payment is {} and cannot be confirmed", other.as_str())));
        }
    };

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE payments SET status = ?, updated_at = ? WHERE payment_intent_id = ?")
        .bind(intent.status.as_str())
        .bind(now_utc())
        .bind(intent_id)
        .execute(&mut *tx)
        .await?;
    if let Some(order_id) = row.order_id.as_deref() {
        let pending: Option<(String,)> =
            sqlx::query_as("SELECT id FROM orders WHERE id = ? AND status = ? AND is_deleted = 0")
                .bind(order_id)
                .bind(OrderStatus::Pending.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        if pending.is_some() {
            confirm_pending(&mut tx, order_id, &format!("payment:{}", intent_id)).await?;
        } else {
            tracing::info!(order_id = %order_id, "paid order is no longer pending, status left unchanged");
        }
    }
    tx.commit().await?;

    tracing::info!(payment_intent_id = %intent_id, "payment confirmed");
    Ok(Json(PaymentResponse {
        success: true,
        message: "Payment confirmed.".into(),
        payment_intent_id: intent.id,
        client_secret: None,
    }))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(intent_id): Path<String>,
    Query(q): Query<RefundQuery>,
) -> AppResult<Json<PaymentResponse>> {
    let intent_id = check_intent_id(&intent_id)?;
    validate_positive_number(q.amount_cents, "amount_cents")?;
    let row = fetch(&state, intent_id).await?;
    // Checked against the gateway's view; the row may lag behind a refund whose write failed.
    let remote = state.payments.retrieve(intent_id).await?;
    if !remote.status.is_refundable() {
        return Err(AppError::BadRequest(format!("Payment is {} and cannot be refunded", remote.status.as_str())));
    }
    let remaining = remote.amount_cents - remote.refunded_cents;
    if q.amount_cents.is_some_and(|a| a > remaining) {
        return Err(AppError::BadRequest(format!("Refund exceeds the refundable amount ({})", remaining)));
    }

    let refund = state.payments.refund(intent_id, q.amount_cents).await?;
    sqlx::query("UPDATE payments SET refunded_cents = ?, status = ?, updated_at = ? WHERE payment_intent_id = ?")
        .bind(refund.refunded_total_cents)
        .bind(refund.status.as_str())
        .bind(now_utc())
        .bind(intent_id)
        .execute(&state.db)
        .await?;

    state.metrics.inc_refunds();
    tracing::info!(
        payment_intent_id = %intent_id,
        amount = refund.amount_cents,
        refunded_total = refund.refunded_total_cents,
        "payment refunded"
    );
    Ok(Json(PaymentResponse {
        success: true,
        message: format!("Refunded {} {}.", crate::money::format_cents(refund.amount_cents), row.currency),
        payment_intent_id: intent_id.to_string(),
        client_secret: None,
    }))
}

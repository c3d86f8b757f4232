//! Order placement and lifecycle.
//!
//! Every status change goes through a compare-and-set `UPDATE ... WHERE status = ?`
//! and is appended to `order_events` inside the same transaction.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    checkout::{self, ProductSnapshot},
    error::{
        validation::{parse_id, Validator},
        AppError, AppResult, FieldError, OptionExt,
    },
    middleware::{ip::MaybeRemoteAddr, AdminAuth, Authenticated, BuyerAuth, Identity, Role},
    money,
    state::AppState,
    types::{
        now_utc, AdminOrderRequest, CancelOrderRequest, OrderFilters, OrderItemResponse, OrderRequest, OrderResponse,
        OrderRow, OrderSort, OrderStatus, Page, SortDirection, UpdateOrderRequest,
    },
};

const SELECT_ORDER: &str = "SELECT id, buyer_id, status, shipping_address, shipping_price_cents, courier_service, \
     tracking_number, total_price_cents, order_date, shipped_date, cancelled_date, cancellation_reason FROM orders";

fn actor_label(identity: &Identity) -> String {
    match identity.role {
        Role::Admin => "admin".to_string(),
        Role::Buyer => format!("buyer:{}", identity.user_id),
    }
}

pub(crate) async fn record_event(
    conn: &mut SqliteConnection,
    order_id: &str,
    from: Option<OrderStatus>,
    to: OrderStatus,
    actor: &str,
    note: Option<&str>,
) -> AppResult<()> {
    sqlx::query("INSERT INTO order_events(order_id, from_status, to_status, actor, note, created_at) VALUES(?,?,?,?,?,?)")
        .bind(order_id)
        .bind(from.map(|s| s.as_str()))
        .bind(to.as_str())
        .bind(actor)
        .bind(note)
        .bind(now_utc())
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> AppResult<OrderRow> {
    sqlx::query_as::<_, OrderRow>(&format!("{} WHERE id = ? AND is_deleted = 0", SELECT_ORDER))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_not_found("Order")
}

fn status_of(row: &OrderRow) -> AppResult<OrderStatus> {
    OrderStatus::parse(&row.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order {} has unknown status {:?}", row.id, row.status)))
}

async fn load_items(state: &AppState, order_id: &str) -> AppResult<Vec<OrderItemResponse>> {
    let items = sqlx::query_as::<_, OrderItemResponse>(
        "SELECT oi.product_id, COALESCE(p.name, '') AS product_name, oi.quantity, oi.unit_price_cents, oi.subtotal_cents \
         FROM order_items oi LEFT JOIN products p ON p.id = oi.product_id WHERE oi.order_id = ? ORDER BY oi.id",
    )
    .bind(order_id)
    .fetch_all(&state.db)
    .await?;
    Ok(items)
}

async fn respond(state: &AppState, row: OrderRow) -> AppResult<OrderResponse> {
    let items = load_items(state, &row.id).await?;
    Ok(OrderResponse::from_row(row, items))
}

async fn load_response(state: &AppState, id: &str) -> AppResult<OrderResponse> {
    let mut conn = state.db.acquire().await?;
    let row = fetch_order(&mut conn, id).await?;
    drop(conn);
    respond(state, row).await
}

/// Validates, reserves stock and inserts the order in one transaction.
async fn place_order(state: &AppState, buyer_id: Uuid, req: OrderRequest, actor: &str) -> AppResult<OrderResponse> {
    checkout::validate_request(&req)?;
    let lines = checkout::merge_lines(&req.items)?;
    let buyer = buyer_id.to_string();

    let mut tx = state.db.begin().await?;

    let known: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(&buyer)
        .fetch_optional(&mut *tx)
        .await?;
    if known.is_none() {
        return Err(AppError::BadRequest(format!("Buyer {} does not exist", buyer)));
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, name, price_cents, stock_quantity FROM products WHERE is_deleted = 0 AND is_active = 1 AND id IN (",
    );
    let mut sep = qb.separated(", ");
    for line in &lines {
        sep.push_bind(line.product_id.to_string());
    }
    qb.push(")");
    let snapshots: Vec<ProductSnapshot> = qb.build_query_as().fetch_all(&mut *tx).await?;
    let products: HashMap<String, ProductSnapshot> = snapshots.into_iter().map(|p| (p.id.clone(), p)).collect();

    let missing: Vec<String> = lines
        .iter()
        .map(|l| l.product_id.to_string())
        .filter(|id| !products.contains_key(id))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(buyer_id = %buyer, "order references unknown products: {:?}", missing);
        return Err(AppError::BadRequest(format!("Products not found: {}", missing.join(", "))));
    }

    let violations = checkout::business_rule_violations(&lines, &products);
    if !violations.is_empty() {
        tracing::warn!(buyer_id = %buyer, count = violations.len(), "order rejected by business rules");
        return Err(AppError::Validation(
            violations.into_iter().map(|message| FieldError { field: "items".into(), message }).collect(),
        ));
    }

    for line in &lines {
        let res = sqlx::query(
            "UPDATE products SET stock_quantity = stock_quantity - ?, updated_at = ? WHERE id = ? AND stock_quantity >= ?",
        )
        .bind(line.quantity)
        .bind(now_utc())
        .bind(line.product_id.to_string())
        .bind(line.quantity)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            // Dropping the transaction rolls back the decrements already applied.
            tracing::warn!(product_id = %line.product_id, "stock reservation lost a race");
            return Err(AppError::BadRequest("Insufficient stock".into()));
        }
    }

    let order_id = Uuid::new_v4().to_string();
    let now = now_utc();
    sqlx::query(
        "INSERT INTO orders(id, buyer_id, status, shipping_address, shipping_price_cents, courier_service, \
         tracking_number, total_price_cents, order_date) VALUES(?,?,?,?,?,?,?,?,?)",
    )
    .bind(&order_id)
    .bind(&buyer)
    .bind(OrderStatus::Pending.as_str())
    .bind(req.shipping_address.trim())
    .bind(req.shipping_price_cents)
    .bind(req.courier_service.trim())
    .bind(req.tracking_number.trim())
    .bind(req.total_price_cents)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for line in &lines {
        sqlx::query(
            "INSERT INTO order_items(order_id, product_id, quantity, unit_price_cents, subtotal_cents) VALUES(?,?,?,?,?)",
        )
        .bind(&order_id)
        .bind(line.product_id.to_string())
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(money::line_subtotal(line.unit_price_cents, line.quantity)?)
        .execute(&mut *tx)
        .await?;
    }
    record_event(&mut tx, &order_id, None, OrderStatus::Pending, actor, None).await?;
    tx.commit().await?;

    for line in &lines {
        state.product_cache.invalidate(&line.product_id.to_string());
    }
    state.metrics.record_order(req.total_price_cents);
    tracing::info!(
        order_id = %order_id,
        buyer_id = %buyer,
        items = lines.len(),
        total = %money::format_cents(req.total_price_cents),
        "order placed"
    );
    load_response(state, &order_id).await
}

pub async fn create_order(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    MaybeRemoteAddr(remote): MaybeRemoteAddr,
    headers: HeaderMap,
    Json(req): Json<OrderRequest>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.throttle("/api/orders", &headers, remote.map(|a| a.ip())).await?;
    let actor = format!("buyer:{}", buyer);
    let order = place_order(&state, buyer, req, &actor).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn admin_create_order(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<AdminOrderRequest>,
) -> AppResult<impl IntoResponse> {
    let order = place_order(&state, req.buyer_id, req.order, "admin").await?;
    Ok((StatusCode::CREATED, Json(order)))
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, buyer: Option<Uuid>, status: Option<OrderStatus>) {
    qb.push(" WHERE is_deleted = 0");
    if let Some(b) = buyer {
        qb.push(" AND buyer_id = ").push_bind(b.to_string());
    }
    if let Some(s) = status {
        qb.push(" AND status = ").push_bind(s.as_str());
    }
}

async fn list(state: &AppState, buyer: Option<Uuid>, filters: OrderFilters) -> AppResult<Page<OrderResponse>> {
    let cfg = &state.config.orders;
    let page = filters.page.unwrap_or(1);
    let page_size = filters.page_size.unwrap_or(cfg.default_page_size);
    let mut v = Validator::new();
    v.check(page >= 1, "page", "page must be at least 1").check(
        (1..=cfg.max_page_size).contains(&page_size),
        "page_size",
        format!("page_size must be between 1 and {}", cfg.max_page_size),
    );
    v.finish()?;

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM orders");
    push_filters(&mut count_qb, buyer, filters.status);
    let (total,): (i64,) = count_qb.build_query_as().fetch_one(&state.db).await?;

    let dir = match filters.direction.unwrap_or_default() {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_ORDER);
    push_filters(&mut qb, buyer, filters.status);
    match filters.sort.unwrap_or_default() {
        OrderSort::OrderDate => qb.push(format!(" ORDER BY order_date {dir}, id {dir}")),
        OrderSort::Status => qb.push(format!(" ORDER BY status {dir}, order_date DESC, id DESC")),
    };
    qb.push(" LIMIT ")
        .push_bind(page_size as i64)
        .push(" OFFSET ")
        .push_bind((page as i64 - 1) * page_size as i64);
    let rows: Vec<OrderRow> = qb.build_query_as().fetch_all(&state.db).await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(respond(state, row).await?);
    }
    Ok(Page::new(items, page, page_size, total))
}

pub async fn list_my_orders(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Query(filters): Query<OrderFilters>,
) -> AppResult<Json<Page<OrderResponse>>> {
    Ok(Json(list(&state, Some(buyer), filters).await?))
}

pub async fn list_all_orders(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Query(filters): Query<OrderFilters>,
) -> AppResult<Json<Page<OrderResponse>>> {
    Ok(Json(list(&state, None, filters).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(id): Path<String>,
) -> AppResult<Json<OrderResponse>> {
    let id = parse_id(&id, "order")?.to_string();
    let order = load_response(&state, &id).await?;
    if !identity.is_admin() && order.buyer_id != identity.user_id.to_string() {
        return Err(AppError::NotFound("Order not found".into()));
    }
    Ok(Json(order))
}

pub async fn update_order(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrderRequest>,
) -> AppResult<Json<OrderResponse>> {
    let id = parse_id(&id, "order")?.to_string();
    let mut v = Validator::new();
    v.text(&req.shipping_address, "shipping_address", 500)
        .text(&req.courier_service, "courier_service", 100)
        .check(req.status.is_update_target(), "status", "Status can only be set to processing or shipped.");
    v.finish()?;

    let mut tx = state.db.begin().await?;
    let row = fetch_order(&mut tx, &id).await?;
    let current = status_of(&row)?;
    if !current.is_updatable() {
        return Err(AppError::BadRequest(format!("Order cannot be updated while {}", current)));
    }

    let now = now_utc();
    let shipped_date = (req.status == OrderStatus::Shipped).then(|| now.clone());
    let res = sqlx::query(
        "UPDATE orders SET status = ?, shipping_address = ?, courier_service = ?, \
         shipped_date = COALESCE(?, shipped_date), updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(req.status.as_str())
    .bind(req.shipping_address.trim())
    .bind(req.courier_service.trim())
    .bind(shipped_date)
    .bind(&now)
    .bind(&id)
    .bind(current.as_str())
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict("Order was modified concurrently".into()));
    }
    if current != req.status {
        record_event(&mut tx, &id, Some(current), req.status, "admin", None).await?;
    }
    tx.commit().await?;

    tracing::info!(order_id = %id, from = %current, to = %req.status, "order updated");
    Ok(Json(load_response(&state, &id).await?))
}

/// Moves a Pending order to Confirmed inside the caller's transaction.
pub(crate) async fn confirm_pending(conn: &mut SqliteConnection, id: &str, actor: &str) -> AppResult<()> {
    let row = fetch_order(conn, id).await?;
    match status_of(&row)? {
        OrderStatus::Pending => {}
        OrderStatus::Confirmed => return Err(AppError::BadRequest("Order is already confirmed.".into())),
        other => return Err(AppError::BadRequest(format!("Only pending orders can be confirmed (order is {})", other))),
    }
    let res = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(OrderStatus::Confirmed.as_str())
        .bind(now_utc())
        .bind(id)
        .bind(OrderStatus::Pending.as_str())
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict("Order was modified concurrently".into()));
    }
    record_event(conn, id, Some(OrderStatus::Pending), OrderStatus::Confirmed, actor, None).await
}

pub async fn confirm_order(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<Json<OrderResponse>> {
    let id = parse_id(&id, "order")?.to_string();
    let mut tx = state.db.begin().await?;
    confirm_pending(&mut tx, &id, "admin").await?;
    tx.commit().await?;
    tracing::info!(order_id = %id, "order confirmed");
    Ok(Json(load_response(&state, &id).await?))
}

async fn cancel(state: &AppState, identity: Identity, id: &str, reason: Option<String>) -> AppResult<OrderResponse> {
    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    if identity.is_admin() {
        let mut v = Validator::new();
        v.check(reason.is_some(), "reason", "A cancellation reason is required.");
        v.finish()?;
    }
    if let Some(r) = reason.as_deref() {
        let mut v = Validator::new();
        v.text(r, "reason", 500);
        v.finish()?;
    }

    let mut tx = state.db.begin().await?;
    let row = fetch_order(&mut tx, id).await?;
    if !identity.is_admin() && row.buyer_id != identity.user_id.to_string() {
        return Err(AppError::Forbidden("You can only cancel your own orders".into()));
    }
    let current = status_of(&row)?;
    if !current.is_cancellable_by(identity.role) {
        return Err(AppError::BadRequest(format!("Order cannot be cancelled while {}", current)));
    }

    let now = now_utc();
    let res = sqlx::query(
        "UPDATE orders SET status = ?, cancelled_date = ?, cancellation_reason = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(OrderStatus::Cancelled.as_str())
    .bind(&now)
    .bind(reason.as_deref())
    .bind(&now)
    .bind(id)
    .bind(current.as_str())
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::Conflict("Order was modified concurrently".into()));
    }

    let items: Vec<(String, i64)> = sqlx::query_as("SELECT product_id, quantity FROM order_items WHERE order_id = ?")
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
    for (product_id, quantity) in &items {
        let restored = sqlx::query("UPDATE products SET stock_quantity = stock_quantity + ?, updated_at = ? WHERE id = ?")
            .bind(quantity)
            .bind(&now)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        if restored.rows_affected() == 0 {
            tracing::warn!(order_id = %id, product_id = %product_id, "cannot restore stock, product is gone");
        }
    }
    let actor = actor_label(&identity);
    record_event(&mut tx, id, Some(current), OrderStatus::Cancelled, &actor, reason.as_deref()).await?;
    tx.commit().await?;

    for (product_id, _) in &items {
        state.product_cache.invalidate(product_id);
    }
    state.metrics.record_cancellation(row.total_price_cents);
    tracing::info!(order_id = %id, actor = %actor, restored_lines = items.len(), "order cancelled");
    load_response(state, id).await
}

pub async fn cancel_my_order(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Path(id): Path<String>,
    body: Option<Json<CancelOrderRequest>>,
) -> AppResult<Json<OrderResponse>> {
    let id = parse_id(&id, "order")?.to_string();
    let reason = body.and_then(|Json(b)| b.reason);
    let identity = Identity { user_id: buyer, role: Role::Buyer };
    Ok(Json(cancel(&state, identity, &id, reason).await?))
}

pub async fn admin_cancel_order(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> AppResult<Json<OrderResponse>> {
    let id = parse_id(&id, "order")?.to_string();
    let identity = Identity { user_id: Uuid::nil(), role: Role::Admin };
    Ok(Json(cancel(&state, identity, &id, req.reason).await?))
}

async fn soft_delete(state: &AppState, identity: Identity, id: &str) -> AppResult<()> {
    let mut tx = state.db.begin().await?;
    let row = fetch_order(&mut tx, id).await?;
    if !identity.is_admin() {
        if row.buyer_id != identity.user_id.to_string() {
            return Err(AppError::Forbidden("You can only delete your own orders".into()));
        }
        if status_of(&row)? != OrderStatus::Cancelled {
            return Err(AppError::BadRequest("Only cancelled orders can be deleted".into()));
        }
    }
    sqlx::query("UPDATE orders SET is_deleted = 1, updated_at = ? WHERE id = ?")
        .bind(now_utc())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!(order_id = %id, actor = %actor_label(&identity), "order deleted");
    Ok(())
}

pub async fn delete_my_order(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id, "order")?.to_string();
    soft_delete(&state, Identity { user_id: buyer, role: Role::Buyer }, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn admin_delete_order(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id, "order")?.to_string();
    soft_delete(&state, Identity { user_id: Uuid::nil(), role: Role::Admin }, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

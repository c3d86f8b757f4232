//! Buyer cart and wishlist. The cart is the set of `cart_items` rows for a
//! buyer; it exists as soon as the first line is added.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{validation::parse_id, AppError, AppResult, OptionExt},
    middleware::BuyerAuth,
    state::AppState,
    types::{now_utc, AddCartItemRequest, CartLine, CartView, SetQuantityRequest, WishlistAddRequest, WishlistEntry},
};

async fn purchasable_stock(state: &AppState, product_id: &str) -> AppResult<i64> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT stock_quantity FROM products WHERE id = ? AND is_deleted = 0 AND is_active = 1")
            .bind(product_id)
            .fetch_optional(&state.db)
            .await?;
    row.map(|(s,)| s).ok_or_not_found("Product")
}

async fn current_quantity(state: &AppState, buyer: &str, product_id: &str) -> AppResult<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT quantity FROM cart_items WHERE buyer_id = ? AND product_id = ?")
        .bind(buyer)
        .bind(product_id)
        .fetch_optional(&state.db)
        .await?;
    Ok(row.map(|(q,)| q).unwrap_or(0))
}

async fn put_line(state: &AppState, buyer: &str, product_id: &str, quantity: i64) -> AppResult<()> {
    let stock = purchasable_stock(state, product_id).await?;
    if quantity > stock {
        return Err(AppError::BadRequest(format!(
            "Insufficient stock (Available: {}, Requested: {})",
            stock, quantity
        )));
    }
    sqlx::query(
        "INSERT INTO cart_items(buyer_id, product_id, quantity, added_at) VALUES(?,?,?,?) \
         ON CONFLICT(buyer_id, product_id) DO UPDATE SET quantity = excluded.quantity",
    )
    .bind(buyer)
    .bind(product_id)
    .bind(quantity)
    .bind(now_utc())
    .execute(&state.db)
    .await?;
    Ok(())
}

pub(crate) async fn load_cart(state: &AppState, buyer: &str) -> AppResult<CartView> {
    let items = sqlx::query_as::<_, CartLine>(
        "SELECT ci.product_id, p.name AS product_name, p.price_cents AS unit_price_cents, ci.quantity, \
         p.price_cents * ci.quantity AS subtotal_cents, p.stock_quantity AS in_stock \
         FROM cart_items ci JOIN products p ON p.id = ci.product_id \
         WHERE ci.buyer_id = ? AND p.is_deleted = 0 ORDER BY ci.added_at, p.name",
    )
    .bind(buyer)
    .fetch_all(&state.db)
    .await?;

    let item_count = items.iter().map(|l| l.quantity).sum();
    let total_cents = items.iter().map(|l| l.subtotal_cents).sum();
    Ok(CartView { items, item_count, total_cents })
}

pub async fn get_cart(State(state): State<AppState>, BuyerAuth(buyer): BuyerAuth) -> AppResult<Json<CartView>> {
    Ok(Json(load_cart(&state, &buyer.to_string()).await?))
}

pub async fn add_item(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Json(req): Json<AddCartItemRequest>,
) -> AppResult<Json<CartView>> {
    if req.quantity <= 0 {
        return Err(AppError::ValidationError {
            field: "quantity".into(),
            message: "Quantity must be greater than zero.".into(),
        });
    }
    let buyer = buyer.to_string();
    let product_id = req.product_id.to_string();
    let existing = current_quantity(&state, &buyer, &product_id).await?;
    let wanted = existing
        .checked_add(req.quantity)
        .ok_or_else(|| AppError::InvalidInput("Quantity overflows".into()))?;
    put_line(&state, &buyer, &product_id, wanted).await?;
    tracing::debug!(buyer_id = %buyer, product_id = %product_id, quantity = wanted, "cart line set");
    Ok(Json(load_cart(&state, &buyer).await?))
}

pub async fn set_quantity(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Path(product_id): Path<String>,
    Json(req): Json<SetQuantityRequest>,
) -> AppResult<Json<CartView>> {
    let product_id = parse_id(&product_id, "product")?.to_string();
    let buyer = buyer.to_string();
    match req.quantity {
        q if q < 0 => {
            return Err(AppError::ValidationError {
                field: "quantity".into(),
                message: "Quantity cannot be negative.".into(),
            })
        }
        0 => remove_line(&state, &buyer, &product_id).await?,
        q => {
            if current_quantity(&state, &buyer, &product_id).await? == 0 {
                return Err(AppError::NotFound("Cart item not found".into()));
            }
            put_line(&state, &buyer, &product_id, q).await?
        }
    }
    Ok(Json(load_cart(&state, &buyer).await?))
}

async fn remove_line(state: &AppState, buyer: &str, product_id: &str) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM cart_items WHERE buyer_id = ? AND product_id = ?")
        .bind(buyer)
        .bind(product_id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Cart item not found".into()));
    }
    Ok(())
}

pub async fn remove_item(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Path(product_id): Path<String>,
) -> AppResult<Json<CartView>> {
    let product_id = parse_id(&product_id, "product")?.to_string();
    let buyer = buyer.to_string();
    remove_line(&state, &buyer, &product_id).await?;
    Ok(Json(load_cart(&state, &buyer).await?))
}

pub async fn clear_cart(State(state): State<AppState>, BuyerAuth(buyer): BuyerAuth) -> AppResult<StatusCode> {
    sqlx::query("DELETE FROM cart_items WHERE buyer_id = ?")
        .bind(buyer.to_string())
        .execute(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_wishlist(state: &AppState, buyer: &str) -> AppResult<Vec<WishlistEntry>> {
    let rows = sqlx::query_as::<_, WishlistEntry>(
        "SELECT w.product_id, p.name AS product_name, p.price_cents, \
         (p.is_deleted = 0 AND p.is_active = 1 AND p.stock_quantity > 0) AS available, w.added_at \
         FROM wishlist_items w JOIN products p ON p.id = w.product_id \
         WHERE w.buyer_id = ? ORDER BY w.added_at DESC, p.name",
    )
    .bind(buyer)
    .fetch_all(&state.db)
    .await?;
    Ok(rows)
}

pub async fn get_wishlist(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
) -> AppResult<Json<Vec<WishlistEntry>>> {
    Ok(Json(load_wishlist(&state, &buyer.to_string()).await?))
}

pub async fn add_to_wishlist(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Json(req): Json<WishlistAddRequest>,
) -> AppResult<(StatusCode, Json<Vec<WishlistEntry>>)> {
    let product_id = req.product_id.to_string();
    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM products WHERE id = ? AND is_deleted = 0")
        .bind(&product_id)
        .fetch_optional(&state.db)
        .await?;
    exists.ok_or_not_found("Product")?;

    let buyer = buyer.to_string();
    sqlx::query("INSERT OR IGNORE INTO wishlist_items(buyer_id, product_id, added_at) VALUES(?,?,?)")
        .bind(&buyer)
        .bind(&product_id)
        .bind(now_utc())
        .execute(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(load_wishlist(&state, &buyer).await?)))
}

async fn remove_wish(state: &AppState, buyer: &str, product_id: &str) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM wishlist_items WHERE buyer_id = ? AND product_id = ?")
        .bind(buyer)
        .bind(product_id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Wishlist item not found".into()));
    }
    Ok(())
}

pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Path(product_id): Path<String>,
) -> AppResult<StatusCode> {
    let product_id = parse_id(&product_id, "product")?.to_string();
    remove_wish(&state, &buyer.to_string(), &product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn move_to_cart(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Path(product_id): Path<String>,
) -> AppResult<Json<CartView>> {
    let product_id: Uuid = parse_id(&product_id, "product")?;
    let (buyer, product_id) = (buyer.to_string(), product_id.to_string());

    let wished: Option<(String,)> =
        sqlx::query_as("SELECT product_id FROM wishlist_items WHERE buyer_id = ? AND product_id = ?")
            .bind(&buyer)
            .bind(&product_id)
            .fetch_optional(&state.db)
            .await?;
    wished.ok_or_not_found("Wishlist item")?;

    let existing = current_quantity(&state, &buyer, &product_id).await?;
    put_line(&state, &buyer, &product_id, existing + 1).await?;
    remove_wish(&state, &buyer, &product_id).await?;
    Ok(Json(load_cart(&state, &buyer).await?))
}

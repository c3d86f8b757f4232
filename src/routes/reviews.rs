use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{
        validation::{parse_id, Validator},
        AppError, AppResult, OptionExt,
    },
    middleware::BuyerAuth,
    state::AppState,
    types::{now_utc, OrderStatus, ReviewRequest, ReviewResponse, TopRatedProduct, TopRatedQuery},
};

const SELECT_REVIEW: &str = "SELECT r.id, r.product_id, r.rating, r.comment, u.full_name AS buyer_name, r.status, r.created_at \
     FROM reviews r JOIN users u ON u.id = r.buyer_id";

pub async fn add_review(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    Json(req): Json<ReviewRequest>,
) -> AppResult<impl IntoResponse> {
    let mut v = Validator::new();
    v.check((1..=5).contains(&req.rating), "rating", "Rating must be between 1 and 5.")
        .check(req.comment.chars().count() <= 2000, "comment", "Comment must not exceed 2000 characters.");
    v.finish()?;

    let buyer = buyer.to_string();
    let product_id = req.product_id.to_string();
    let order_id = req.order_id.to_string();

    let product: Option<(String,)> = sqlx::query_as("SELECT id FROM products WHERE id = ? AND is_deleted = 0")
        .bind(&product_id)
        .fetch_optional(&state.db)
        .await?;
    product.ok_or_not_found("Product")?;

    let order: Option<(String, String)> =
        sqlx::query_as("SELECT buyer_id, status FROM orders WHERE id = ? AND is_deleted = 0")
            .bind(&order_id)
            .fetch_optional(&state.db)
            .await?;
    let (owner, status) = order.ok_or_not_found("Order")?;
    if owner != buyer {
        return Err(AppError::Forbidden("You can only review products from your own orders".into()));
    }
    if status == OrderStatus::Cancelled.as_str() {
        return Err(AppError::BadRequest("Cancelled orders cannot be reviewed".into()));
    }

    let contains: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM order_items WHERE order_id = ? AND product_id = ? LIMIT 1")
        .bind(&order_id)
        .bind(&product_id)
        .fetch_optional(&state.db)
        .await?;
    if contains.is_none() {
        return Err(AppError::BadRequest("This order does not contain the reviewed product".into()));
    }

    let id = Uuid::new_v4().to_string();
    let res = sqlx::query(
        "INSERT INTO reviews(id, buyer_id, order_id, product_id, rating, comment, status, created_at) VALUES(?,?,?,?,?,?,?,?)",
    )
    .bind(&id)
    .bind(&buyer)
    .bind(&order_id)
    .bind(&product_id)
    .bind(req.rating)
    .bind(req.comment.trim())
    .bind("pending")
    .bind(now_utc())
    .execute(&state.db)
    .await;
    match res {
        Ok(_) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::Conflict("You already reviewed this product for this order.".into()));
        }
        Err(e) => return Err(e.into()),
    }

    state.product_cache.invalidate(&product_id);
    state.metrics.inc_reviews_added();
    tracing::info!(review_id = %id, product_id = %product_id, rating = req.rating, "review added");

    let review = sqlx::query_as::<_, ReviewResponse>(&format!("{} WHERE r.id = ?", SELECT_REVIEW))
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn reviews_for_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> AppResult<Json<Vec<ReviewResponse>>> {
    let product_id = parse_id(&product_id, "product")?.to_string();
    let reviews = sqlx::query_as::<_, ReviewResponse>(&format!(
        "{} WHERE r.product_id = ? AND r.is_deleted = 0 ORDER BY r.created_at DESC, r.id",
        SELECT_REVIEW
    ))
    .bind(product_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(reviews))
}

pub async fn top_rated(
    State(state): State<AppState>,
    Query(q): Query<TopRatedQuery>,
) -> AppResult<Json<Vec<TopRatedProduct>>> {
    let cfg = &state.config.catalog;
    let count = q.count.unwrap_or(cfg.top_rated_default).clamp(1, cfg.top_rated_max);
    let rows = sqlx::query_as::<_, TopRatedProduct>(
        "SELECT r.product_id, p.name AS product_name, CAST(AVG(r.rating) AS REAL) AS average_rating, COUNT(*) AS reviews_count \
         FROM reviews r JOIN products p ON p.id = r.product_id \
         WHERE r.is_deleted = 0 AND p.is_deleted = 0 \
         GROUP BY r.product_id, p.name \
         ORDER BY average_rating DESC, reviews_count DESC, p.name \
         LIMIT ?",
    )
    .bind(count as i64)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

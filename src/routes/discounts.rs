use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{
        validation::{parse_id, Validator},
        AppError, AppResult, OptionExt, UniqueExt,
    },
    middleware::{ip::MaybeRemoteAddr, AdminAuth, BuyerAuth},
    pricing,
    state::AppState,
    types::{
        now_utc, to_db_time, AppliedDiscount, ApplyDiscountRequest, CreateDiscountRequest, DiscountDetails,
        DiscountKind, DiscountListQuery, DiscountRow, UpdateDiscountRequest,
    },
};

const SELECT_DISCOUNT: &str = "SELECT id, code, kind, value, applicable_product_ids, applicable_category_ids, \
     start_date, end_date, is_active, is_deleted, usage_count FROM discounts";

fn id_list(ids: &[Uuid]) -> AppResult<String> {
    let as_text: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
    serde_json::to_string(&as_text).map_err(|e| AppError::Internal(e.into()))
}

async fn fetch(state: &AppState, id: &str) -> AppResult<DiscountRow> {
    sqlx::query_as::<_, DiscountRow>(&format!("{} WHERE id = ? AND is_deleted = 0", SELECT_DISCOUNT))
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Discount")
}

pub async fn create_discount(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<CreateDiscountRequest>,
) -> AppResult<impl IntoResponse> {
    pricing::validate_code(&req.code)?;
    let now = Utc::now();
    let mut v = Validator::new();
    pricing::validate_terms(&mut v, req.kind, req.value, &req.start_date, &req.end_date, &now, true);
    v.finish()?;

    let code = pricing::normalize_code(&req.code);

    // One live discount per code, enforced by the schema.
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO discounts(id, code, kind, value, applicable_product_ids, applicable_category_ids, start_date, end_date, created_at) \
         VALUES(?,?,?,?,?,?,?,?,?)",
    )
    .bind(&id)
    .bind(&code)
    .bind(req.kind.as_str())
    .bind(req.value)
    .bind(id_list(&req.applicable_product_ids)?)
    .bind(id_list(&req.applicable_category_ids)?)
    .bind(to_db_time(&req.start_date))
    .bind(to_db_time(&req.end_date))
    .bind(now_utc())
    .execute(&state.db)
    .await
    .conflict_on_unique(|| format!("Discount code {} already exists", code))?;

    tracing::info!(discount_id = %id, code = %code, kind = req.kind.as_str(), value = req.value, "discount created");
    let row = fetch(&state, &id).await?;
    Ok((StatusCode::CREATED, Json(DiscountDetails::from_row(row, &now_utc()))))
}

pub async fn list_discounts(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Query(q): Query<DiscountListQuery>,
) -> AppResult<Json<Vec<DiscountDetails>>> {
    let now = now_utc();
    // Soft-deleted codes stay visible (status "Deleted") unless only active ones are asked for.
    let filter = match q.status.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
        None => "",
        Some(s) if s.is_empty() => "",
        Some(s) if s == "active" => " WHERE is_deleted = 0 AND is_active = 1 AND end_date >= ?",
        Some(s) if s == "expired" => " WHERE end_date < ?",
        Some(other) => {
            return Err(AppError::ValidationError {
                field: "status".into(),
                message: format!("Unknown status filter '{}', expected active or expired", other),
            })
        }
    };

    let sql = format!("{}{} ORDER BY start_date DESC, code", SELECT_DISCOUNT, filter);
    let mut query = sqlx::query_as::<_, DiscountRow>(&sql);
    if !filter.is_empty() {
        query = query.bind(&now);
    }
    let rows = query.fetch_all(&state.db).await?;
    if rows.is_empty() {
        return Err(AppError::NotFound("No discounts found.".into()));
    }
    Ok(Json(rows.into_iter().map(|r| DiscountDetails::from_row(r, &now)).collect()))
}

pub async fn get_discount(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<Json<DiscountDetails>> {
    let id = parse_id(&id, "discount")?.to_string();
    let row = fetch(&state, &id).await?;
    Ok(Json(DiscountDetails::from_row(row, &now_utc())))
}

pub async fn update_discount(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
    Json(req): Json<UpdateDiscountRequest>,
) -> AppResult<Json<DiscountDetails>> {
    let id = parse_id(&id, "discount")?.to_string();
    let mut v = Validator::new();
    pricing::validate_terms(&mut v, req.kind, req.value, &req.start_date, &req.end_date, &Utc::now(), false);
    v.finish()?;
    fetch(&state, &id).await?;

    sqlx::query(
        "UPDATE discounts SET kind = ?, value = ?, applicable_product_ids = ?, applicable_category_ids = ?, \
         start_date = ?, end_date = ? WHERE id = ? AND is_deleted = 0",
    )
    .bind(req.kind.as_str())
    .bind(req.value)
    .bind(id_list(&req.applicable_product_ids)?)
    .bind(id_list(&req.applicable_category_ids)?)
    .bind(to_db_time(&req.start_date))
    .bind(to_db_time(&req.end_date))
    .bind(&id)
    .execute(&state.db)
    .await?;

    tracing::info!(discount_id = %id, "discount updated");
    let row = fetch(&state, &id).await?;
    Ok(Json(DiscountDetails::from_row(row, &now_utc())))
}

pub async fn delete_discount(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id, "discount")?.to_string();
    let res = sqlx::query("UPDATE discounts SET is_deleted = 1, is_active = 0 WHERE id = ? AND is_deleted = 0")
        .bind(&id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Discount not found".into()));
    }
    tracing::info!(discount_id = %id, "discount deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn apply_discount(
    State(state): State<AppState>,
    BuyerAuth(buyer): BuyerAuth,
    MaybeRemoteAddr(remote): MaybeRemoteAddr,
    headers: HeaderMap,
    Json(req): Json<ApplyDiscountRequest>,
) -> AppResult<Json<AppliedDiscount>> {
    state.rate_limiter.throttle("/api/discounts/apply", &headers, remote.map(|a| a.ip())).await?;

    let mut v = Validator::new();
    v.check(!req.code.trim().is_empty(), "code", "Code is required.")
        .check(req.cart_total_cents >= 0, "cart_total_cents", "Cart total cannot be negative.");
    v.finish()?;

    let code = pricing::normalize_code(&req.code);
    let now = now_utc();
    let row = sqlx::query_as::<_, DiscountRow>(&format!(
        "{} WHERE code = ? AND is_deleted = 0 AND is_active = 1 AND start_date <= ? AND end_date >= ?",
        SELECT_DISCOUNT
    ))
    .bind(&code)
    .bind(&now)
    .bind(&now)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Invalid or expired discount code.".into()))?;

    let details = DiscountDetails::from_row(row, &now);
    if !pricing::is_applicable(
        &details.applicable_product_ids,
        &details.applicable_category_ids,
        &req.product_ids,
        &req.category_ids,
    ) {
        return Err(AppError::BadRequest("Discount not applicable to the items in this cart.".into()));
    }

    let kind = DiscountKind::parse(&details.kind)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("discount {} has unknown kind {:?}", details.id, details.kind)))?;
    let (discount_cents, new_total_cents) = pricing::apply(kind, details.value, req.cart_total_cents);

    sqlx::query("UPDATE discounts SET usage_count = usage_count + 1 WHERE id = ?")
        .bind(&details.id)
        .execute(&state.db)
        .await?;
    state.metrics.inc_discounts_applied();
    tracing::info!(
        buyer_id = %buyer,
        code = %code,
        original = req.cart_total_cents,
        discount = discount_cents,
        "discount applied"
    );

    Ok(Json(AppliedDiscount {
        code,
        original_total_cents: req.cart_total_cents,
        discount_cents,
        new_total_cents,
    }))
}

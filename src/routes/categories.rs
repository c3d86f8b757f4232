use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{
        validation::{parse_id, Validator},
        AppError, AppResult, OptionExt, UniqueExt,
    },
    middleware::AdminAuth,
    state::AppState,
    types::{now_utc, Category, CategoryRequest},
};

const SELECT_CATEGORY: &str = "SELECT id, name, description, created_at, updated_at FROM categories";

fn validate(req: &CategoryRequest) -> AppResult<()> {
    let mut v = Validator::new();
    v.text(&req.name, "name", 100);
    if let Some(d) = req.description.as_deref() {
        v.check(d.chars().count() <= 500, "description", "description must not exceed 500 characters");
    }
    v.finish()
}

fn name_conflict(name: &str) -> impl FnOnce() -> String + '_ {
    move || format!("Category '{}' already exists", name)
}

pub(crate) async fn fetch(state: &AppState, id: &str) -> AppResult<Category> {
    sqlx::query_as::<_, Category>(&format!("{} WHERE id = ? AND is_deleted = 0", SELECT_CATEGORY))
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Category")
}

pub async fn create_category(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<CategoryRequest>,
) -> AppResult<impl IntoResponse> {
    validate(&req)?;
    let name = req.name.trim();

    // Live names are unique (case-insensitive) at the schema level.
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO categories(id, name, description, created_at) VALUES(?,?,?,?)")
        .bind(&id)
        .bind(name)
        .bind(req.description.as_deref().map(str::trim))
        .bind(now_utc())
        .execute(&state.db)
        .await
        .conflict_on_unique(name_conflict(name))?;
    tracing::info!(category_id = %id, "category created: {}", name);
    Ok((StatusCode::CREATED, Json(fetch(&state, &id).await?)))
}

pub async fn list_categories(State(state): State<AppState>) -> AppResult<Json<Vec<Category>>> {
    let rows = sqlx::query_as::<_, Category>(&format!("{} WHERE is_deleted = 0 ORDER BY name COLLATE NOCASE", SELECT_CATEGORY))
        .fetch_all(&state.db)
        .await?;
    Ok(Json(rows))
}

pub async fn get_category(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Category>> {
    let id = parse_id(&id, "category")?;
    Ok(Json(fetch(&state, &id.to_string()).await?))
}

pub async fn get_category_by_name(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<Json<Category>> {
    let row = sqlx::query_as::<_, Category>(&format!(
        "{} WHERE name = ? COLLATE NOCASE AND is_deleted = 0",
        SELECT_CATEGORY
    ))
    .bind(name.trim())
    .fetch_optional(&state.db)
    .await?
    .ok_or_not_found("Category")?;
    Ok(Json(row))
}

pub async fn update_category(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
    Json(req): Json<CategoryRequest>,
) -> AppResult<Json<Category>> {
    let id = parse_id(&id, "category")?.to_string();
    validate(&req)?;
    fetch(&state, &id).await?;
    let name = req.name.trim();

    sqlx::query("UPDATE categories SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(req.description.as_deref().map(str::trim))
        .bind(now_utc())
        .bind(&id)
        .execute(&state.db)
        .await
        .conflict_on_unique(name_conflict(name))?;

    // Product details embed the category name.
    let product_ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM products WHERE category_id = ?")
        .bind(&id)
        .fetch_all(&state.db)
        .await?;
    state.product_cache.invalidate_many(product_ids.iter().map(|(p,)| p.as_str()));

    Ok(Json(fetch(&state, &id).await?))
}

pub async fn delete_category(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id, "category")?.to_string();
    fetch(&state, &id).await?;

    let (in_use,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM products WHERE category_id = ? AND is_deleted = 0 AND is_active = 1")
            .bind(&id)
            .fetch_one(&state.db)
            .await?;
    if in_use > 0 {
        return Err(AppError::Conflict(format!("Category is still used by {} active product(s)", in_use)));
    }

    sqlx::query("UPDATE categories SET is_deleted = 1, updated_at = ? WHERE id = ?")
        .bind(now_utc())
        .bind(&id)
        .execute(&state.db)
        .await?;
    tracing::info!(category_id = %id, "category deleted");
    Ok(StatusCode::NO_CONTENT)
}

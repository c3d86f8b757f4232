use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    error::{
        validation::{parse_id, Validator},
        AppError, AppResult, OptionExt,
    },
    images::{self, StoredImage},
    middleware::AdminAuth,
    state::AppState,
    types::{
        now_utc, ImageUpload, ProductCreated, ProductDetails, ProductForm, ProductRow, ProductSummary,
        ShippingOption,
    },
};

const SELECT_ROW: &str = "SELECT p.id, p.name, p.description, p.price_cents, p.category_id, c.name AS category_name, \
     p.stock_quantity, p.shipping_option, p.is_active, p.created_at, p.updated_at \
     FROM products p JOIN categories c ON c.id = p.category_id";

const SELECT_SUMMARY: &str = "SELECT p.id, p.name, p.price_cents, p.category_id, c.name AS category_name, \
     p.stock_quantity, p.shipping_option, \
     (SELECT i.url FROM product_images i WHERE i.product_id = p.id ORDER BY i.is_primary DESC, i.position LIMIT 1) AS primary_image_url \
     FROM products p JOIN categories c ON c.id = p.category_id";

const MAX_BY_IDS: usize = 100;

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> AppResult<T> {
    raw.trim().parse::<T>().map_err(|_| AppError::ValidationError {
        field: field.to_string(),
        message: format!("{} must be a whole number", field),
    })
}

/// Buffers a product multipart body. Unknown parts are ignored.
async fn read_form(mut multipart: Multipart) -> AppResult<ProductForm> {
    let mut form = ProductForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "images" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                form.images.push(ImageUpload { file_name, content_type, bytes });
            }
            "name" => form.name = Some(field.text().await?),
            "description" => form.description = Some(field.text().await?),
            "price_cents" => form.price_cents = Some(parse_number("price_cents", &field.text().await?)?),
            "stock_quantity" => form.stock_quantity = Some(parse_number("stock_quantity", &field.text().await?)?),
            "category_id" => form.category_id = Some(parse_id(&field.text().await?, "category")?),
            "shipping_option" => {
                let raw = field.text().await?;
                let opt = ShippingOption::parse(&raw).ok_or_else(|| AppError::ValidationError {
                    field: "shipping_option".into(),
                    message: "shipping_option must be one of standard, express, free, pickup".into(),
                })?;
                form.shipping_option = Some(opt);
            }
            "is_active" => {
                let raw = field.text().await?;
                let flag = match raw.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(AppError::ValidationError {
                        field: "is_active".into(),
                        message: "is_active must be true or false".into(),
                    }),
                };
                form.is_active = Some(flag);
            }
            other => tracing::debug!("ignoring multipart field {:?}", other),
        }
    }
    Ok(form)
}

fn check_fields(v: &mut Validator, form: &ProductForm) {
    if let Some(name) = form.name.as_deref() {
        v.text(name, "name", 100);
    }
    if let Some(desc) = form.description.as_deref() {
        v.text(desc, "description", 1000);
    }
    if let Some(price) = form.price_cents {
        v.check(price > 0, "price_cents", "Price must be greater than zero.");
    }
    if let Some(stock) = form.stock_quantity {
        v.check(stock >= 0, "stock_quantity", "Stock quantity cannot be negative.");
    }
}

fn check_images(v: &mut Validator, images: &[ImageUpload], max_images: usize, max_bytes: usize) {
    v.check(images.len() <= max_images, "images", format!("At most {} images are allowed.", max_images));
    for (i, img) in images.iter().enumerate() {
        if let Err(e) = images::check_upload(img, max_bytes) {
            v.check(false, &format!("images[{}]", i), e.to_string());
        }
    }
}

async fn ensure_category(state: &AppState, id: &Uuid) -> AppResult<()> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM categories WHERE id = ? AND is_deleted = 0")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    match row {
        Some(_) => Ok(()),
        None => Err(AppError::BadRequest(format!("Category {} does not exist", id))),
    }
}

async fn insert_images(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    product_id: &str,
    stored: &[StoredImage],
) -> AppResult<()> {
    for (position, img) in stored.iter().enumerate() {
        sqlx::query(
            "INSERT INTO product_images(id, product_id, storage_key, url, is_primary, position, created_at) VALUES(?,?,?,?,?,?,?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(product_id)
        .bind(&img.key)
        .bind(&img.url)
        .bind(position == 0)
        .bind(position as i64)
        .bind(now_utc())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// What makes two listings the same product.
struct ListingKey<'a> {
    name: &'a str,
    description: &'a str,
    price_cents: i64,
    category_id: String,
}

/// Adds `stock` to the live product matching `key` in one statement.
/// Returns its id and new stock, or `None` when there is no such product.
async fn merge_duplicate(
    conn: &mut SqliteConnection,
    key: &ListingKey<'_>,
    stock: i64,
) -> AppResult<Option<(String, i64)>> {
    let hit = sqlx::query_as(
        "UPDATE products SET stock_quantity = stock_quantity + ?, updated_at = ? \
         WHERE id = (SELECT id FROM products WHERE is_deleted = 0 AND trim(name) = ? COLLATE NOCASE \
                     AND trim(description) = ? COLLATE NOCASE AND price_cents = ? AND category_id = ? \
                     ORDER BY created_at LIMIT 1) \
         RETURNING id, stock_quantity",
    )
    .bind(stock)
    .bind(now_utc())
    .bind(key.name)
    .bind(key.description)
    .bind(key.price_cents)
    .bind(&key.category_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(hit)
}

fn merged(state: &AppState, id: String, added: i64, new_stock: i64) -> (StatusCode, Json<ProductCreated>) {
    state.product_cache.invalidate(&id);
    tracing::info!(product_id = %id, added, stock = new_stock, "merged duplicate product listing");
    (StatusCode::OK, Json(ProductCreated { id, merged: true, stock_quantity: new_stock }))
}

pub async fn create_product(
    State(state): State<AppState>,
    _admin: AdminAuth,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let form = read_form(multipart).await?;
    let media = &state.config.media;

    let mut v = Validator::new();
    v.check(form.name.is_some(), "name", "name is required")
        .check(form.description.is_some(), "description", "description is required")
        .check(form.price_cents.is_some(), "price_cents", "price_cents is required")
        .check(form.stock_quantity.is_some(), "stock_quantity", "stock_quantity is required")
        .check(form.category_id.is_some(), "category_id", "category_id is required")
        .check(!form.images.is_empty(), "images", "At least one image is required.");
    check_fields(&mut v, &form);
    check_images(&mut v, &form.images, media.max_images_per_product, media.max_image_bytes);
    v.finish()?;

    let (Some(name), Some(description), Some(price), Some(stock), Some(category_id)) = (
        form.name.as_deref().map(str::trim),
        form.description.as_deref().map(str::trim),
        form.price_cents,
        form.stock_quantity,
        form.category_id,
    ) else {
        return Err(AppError::BadRequest("Incomplete product form".into()));
    };
    ensure_category(&state, &category_id).await?;

    let key = ListingKey { name, description, price_cents: price, category_id: category_id.to_string() };

    // Same product listed again: fold the new stock into the existing row, nothing uploaded.
    let mut conn = state.db.acquire().await?;
    let hit = merge_duplicate(&mut conn, &key, stock).await?;
    drop(conn);
    if let Some((id, new_stock)) = hit {
        return Ok(merged(&state, id, stock, new_stock));
    }

    let stored = images::upload_all(state.images.as_ref(), &form.images).await?;
    let id = Uuid::new_v4().to_string();
    let shipping = form.shipping_option.unwrap_or_default();

    let result: AppResult<Option<(String, i64)>> = async {
        let mut tx = state.db.begin().await?;
        // First statement is a write, so the transaction holds the write lock from here
        // and a listing created meanwhile is merged into instead of duplicated.
        if let Some(hit) = merge_duplicate(&mut *tx, &key, stock).await? {
            tx.commit().await?;
            return Ok(Some(hit));
        }
        sqlx::query(
            "INSERT INTO products(id, name, description, price_cents, category_id, stock_quantity, shipping_option, is_active, created_at) \
             VALUES(?,?,?,?,?,?,?,?,?)",
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(&key.category_id)
        .bind(stock)
        .bind(shipping.as_str())
        .bind(form.is_active.unwrap_or(true))
        .bind(now_utc())
        .execute(&mut *tx)
        .await?;
        insert_images(&mut tx, &id, &stored).await?;
        tx.commit().await?;
        Ok(None)
    }
    .await;

    match result {
        Ok(None) => {}
        Ok(Some((existing, new_stock))) => {
            images::discard(state.images.as_ref(), &stored).await;
            return Ok(merged(&state, existing, stock, new_stock));
        }
        Err(e) => {
            tracing::error!("Product insert failed, removing {} uploaded image(s): {}", stored.len(), e);
            images::discard(state.images.as_ref(), &stored).await;
            return Err(e);
        }
    }

    state.metrics.inc_products_created();
    state.metrics.add_images(stored.len() as u64);
    tracing::info!(product_id = %id, images = stored.len(), "product created");
    Ok((StatusCode::CREATED, Json(ProductCreated { id, merged: false, stock_quantity: stock })))
}

pub async fn list_products(State(state): State<AppState>) -> AppResult<Json<Vec<ProductSummary>>> {
    let rows = sqlx::query_as::<_, ProductSummary>(&format!(
        "{} WHERE p.is_deleted = 0 AND p.is_active = 1 ORDER BY p.created_at DESC, p.name",
        SELECT_SUMMARY
    ))
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

pub(crate) async fn load_details(state: &AppState, id: &str) -> AppResult<ProductDetails> {
    if let Some(hit) = state.product_cache.get(id) {
        return Ok(hit);
    }

    let row = sqlx::query_as::<_, ProductRow>(&format!("{} WHERE p.id = ? AND p.is_deleted = 0", SELECT_ROW))
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Product")?;
    let urls: Vec<(String,)> =
        sqlx::query_as("SELECT url FROM product_images WHERE product_id = ? ORDER BY is_primary DESC, position")
            .bind(id)
            .fetch_all(&state.db)
            .await?;
    let (avg, count): (Option<f64>, i64) =
        sqlx::query_as("SELECT AVG(rating), COUNT(*) FROM reviews WHERE product_id = ? AND is_deleted = 0")
            .bind(id)
            .fetch_one(&state.db)
            .await?;

    let details = ProductDetails::from_row(row, urls.into_iter().map(|(u,)| u).collect(), avg, count);
    state.product_cache.put(details.clone());
    Ok(details)
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<ProductDetails>> {
    let id = parse_id(&id, "product")?;
    Ok(Json(load_details(&state, &id.to_string()).await?))
}

pub async fn get_products_by_ids(
    State(state): State<AppState>,
    Json(ids): Json<Vec<Uuid>>,
) -> AppResult<Json<Vec<ProductSummary>>> {
    if ids.is_empty() {
        return Ok(Json(Vec::new()));
    }
    if ids.len() > MAX_BY_IDS {
        return Err(AppError::InvalidInput(format!("At most {} ids per request", MAX_BY_IDS)));
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_SUMMARY);
    qb.push(" WHERE p.is_deleted = 0 AND p.id IN (");
    let mut sep = qb.separated(", ");
    for id in &ids {
        sep.push_bind(id.to_string());
    }
    qb.push(")");
    let rows: Vec<ProductSummary> = qb.build_query_as().fetch_all(&state.db).await?;

    let mut by_id: HashMap<String, ProductSummary> = rows.into_iter().map(|r| (r.id.clone(), r)).collect();
    let ordered = ids.iter().filter_map(|id| by_id.remove(&id.to_string())).collect();
    Ok(Json(ordered))
}

pub async fn list_by_category(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Vec<ProductSummary>>> {
    let category: Option<(String,)> =
        sqlx::query_as("SELECT id FROM categories WHERE name = ? COLLATE NOCASE AND is_deleted = 0")
            .bind(name.trim())
            .fetch_optional(&state.db)
            .await?;
    let (category_id,) = category.ok_or_not_found("Category")?;

    let rows = sqlx::query_as::<_, ProductSummary>(&format!(
        "{} WHERE p.category_id = ? AND p.is_deleted = 0 AND p.is_active = 1 ORDER BY p.name",
        SELECT_SUMMARY
    ))
    .bind(category_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

pub async fn update_product(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<Json<ProductDetails>> {
    let id = parse_id(&id, "product")?.to_string();
    let form = read_form(multipart).await?;
    let media = &state.config.media;

    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM products WHERE id = ? AND is_deleted = 0")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?;
    exists.ok_or_not_found("Product")?;

    let mut v = Validator::new();
    check_fields(&mut v, &form);
    check_images(&mut v, &form.images, media.max_images_per_product, media.max_image_bytes);
    v.finish()?;
    if let Some(category_id) = form.category_id.as_ref() {
        ensure_category(&state, category_id).await?;
    }

    // New blobs go up first; the old set stays untouched until the swap commits.
    let stored = if form.images.is_empty() {
        Vec::new()
    } else {
        images::upload_all(state.images.as_ref(), &form.images).await?
    };

    let result: AppResult<Vec<StoredImage>> = async {
        let mut tx = state.db.begin().await?;
        sqlx::query(
            "UPDATE products SET name = COALESCE(?, name), description = COALESCE(?, description), \
             price_cents = COALESCE(?, price_cents), category_id = COALESCE(?, category_id), \
             stock_quantity = COALESCE(?, stock_quantity), shipping_option = COALESCE(?, shipping_option), \
             is_active = COALESCE(?, is_active), updated_at = ? WHERE id = ?",
        )
        .bind(form.name.as_deref().map(str::trim))
        .bind(form.description.as_deref().map(str::trim))
        .bind(form.price_cents)
        .bind(form.category_id.map(|c| c.to_string()))
        .bind(form.stock_quantity)
        .bind(form.shipping_option.map(|s| s.as_str()))
        .bind(form.is_active)
        .bind(now_utc())
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        let mut replaced = Vec::new();
        if !stored.is_empty() {
            let old: Vec<(String, String)> =
                sqlx::query_as("SELECT storage_key, url FROM product_images WHERE product_id = ?")
                    .bind(&id)
                    .fetch_all(&mut *tx)
                    .await?;
            sqlx::query("DELETE FROM product_images WHERE product_id = ?").bind(&id).execute(&mut *tx).await?;
            insert_images(&mut tx, &id, &stored).await?;
            replaced = old.into_iter().map(|(key, url)| StoredImage { key, url }).collect();
        }
        tx.commit().await?;
        Ok(replaced)
    }
    .await;

    let replaced = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(product_id = %id, "Product update failed, removing new images: {}", e);
            images::discard(state.images.as_ref(), &stored).await;
            return Err(e);
        }
    };
    images::discard(state.images.as_ref(), &replaced).await;
    if !stored.is_empty() {
        state.metrics.add_images(stored.len() as u64);
    }

    state.product_cache.invalidate(&id);
    tracing::info!(product_id = %id, new_images = stored.len(), "product updated");
    Ok(Json(load_details(&state, &id).await?))
}

pub async fn delete_product(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id, "product")?.to_string();
    let mut tx = state.db.begin().await?;
    let res = sqlx::query("UPDATE products SET is_deleted = 1, is_active = 0, updated_at = ? WHERE id = ? AND is_deleted = 0")
        .bind(now_utc())
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Product not found".into()));
    }
    // Deleted products cannot be bought; drop them from every cart.
    sqlx::query("DELETE FROM cart_items WHERE product_id = ?").bind(&id).execute(&mut *tx).await?;
    tx.commit().await?;

    state.product_cache.invalidate(&id);
    tracing::info!(product_id = %id, "product deleted");
    Ok(StatusCode::NO_CONTENT)
}

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    build_app,
    config::AppConfig,
    images::{ImageStore, ImageStoreError, LocalImageStore, StoredImage},
    payments::LedgerGateway,
    state::AppState,
    types::ImageUpload,
};

pub const ADMIN_TOKEN: &str = "test-admin";
const BOUNDARY: &str = "warenhaus-test-boundary";

/// Smallest byte strings whose magic bytes pass as PNG / JPEG uploads.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n fake png body";
pub const JPEG_BYTES: &[u8] = b"\xff\xd8\xff\xe0 fake jpeg body";

pub async fn test_pool() -> SqlitePool {
    // One connection: every connection to :memory: is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::db::init_db(&pool).await.unwrap();
    pool
}

/// File-backed pool with several connections, for tests that need real concurrency.
pub async fn file_pool(dir: &std::path::Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(dir.join("warenhaus-test.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));
    let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await.unwrap();
    crate::db::init_db(&pool).await.unwrap();
    pool
}

pub fn test_config(media_root: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.admin_token = ADMIN_TOKEN.to_string();
    cfg.media.root = media_root.display().to_string();
    cfg.media.max_images_per_product = 3;
    cfg.media.max_image_bytes = 64 * 1024;
    cfg
}

/// Router plus the state behind it. The media dir lives as long as this value.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub media: Arc<TempDir>,
    client_ip: String,
}

/// The store production uses, writing below `root`.
pub fn local_store(root: &std::path::Path, cfg: &AppConfig) -> Arc<dyn ImageStore> {
    Arc::new(LocalImageStore::new(root, &cfg.media.public_base, cfg.media.max_image_bytes))
}

/// Local store that fails the `fail_upload`-th upload (1-based) and, when
/// `fail_deletes` is set, every delete.
pub struct FailingStore {
    inner: LocalImageStore,
    fail_upload: usize,
    fail_deletes: bool,
    uploads: AtomicUsize,
}

impl FailingStore {
    pub fn new(root: &std::path::Path, cfg: &AppConfig, fail_upload: usize, fail_deletes: bool) -> Self {
        Self {
            inner: LocalImageStore::new(root, &cfg.media.public_base, cfg.media.max_image_bytes),
            fail_upload,
            fail_deletes,
            uploads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageStore for FailingStore {
    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, ImageStoreError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_upload {
            return Err(ImageStoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.upload(image).await
    }

    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        if self.fail_deletes {
            return Err(ImageStoreError::Io(std::io::Error::other("bucket unavailable")));
        }
        self.inner.delete(key).await
    }
}

pub async fn setup() -> TestApp {
    setup_with(test_pool().await, local_store).await
}

/// Like [`setup`], over `pool` and with the image store built by `store`
/// for the temp media dir.
pub async fn setup_with<F>(pool: SqlitePool, store: F) -> TestApp
where
    F: FnOnce(&std::path::Path, &AppConfig) -> Arc<dyn ImageStore>,
{
    let media = Arc::new(tempfile::tempdir().unwrap());
    let cfg = test_config(media.path());
    let images = store(media.path(), &cfg);
    let payments = Arc::new(LedgerGateway::new(pool.clone()));
    let state = AppState::with_services(pool, cfg, images, payments);
    let app = build_app(state.clone());
    // A distinct client address per app keeps the process-wide limiter out of the way.
    let b = Uuid::new_v4().into_bytes();
    let client_ip = format!("10.{}.{}.{}", b[0], b[1], b[2]);
    TestApp { app, state, media, client_ip }
}

impl TestApp {
    /// A fresh process over the same database and media dir: new gateway,
    /// metrics and caches.
    pub fn restarted(&self) -> TestApp {
        let payments = Arc::new(LedgerGateway::new(self.state.db.clone()));
        let state = AppState::with_services(
            self.state.db.clone(),
            (*self.state.config).clone(),
            self.state.images.clone(),
            payments,
        );
        TestApp {
            app: build_app(state.clone()),
            state,
            media: self.media.clone(),
            client_ip: self.client_ip.clone(),
        }
    }

    /// Number of blobs currently in the media dir.
    pub fn media_files(&self) -> usize {
        std::fs::read_dir(self.media.path()).map(|d| d.count()).unwrap_or(0)
    }

    fn builder(&self, method: Method, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
        let mut b = Request::builder().method(method).uri(uri).header("x-forwarded-for", &self.client_ip);
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        b
    }

    /// Runs a request; the body is parsed as JSON when possible, otherwise returned as a JSON string.
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        if bytes.is_empty() {
            return (status, Value::Null);
        }
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let req = self.builder(Method::GET, uri, token).body(Body::empty()).unwrap();
        self.send(req).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let req = self.builder(Method::DELETE, uri, token).body(Body::empty()).unwrap();
        self.send(req).await
    }

    pub async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let req = self
            .builder(method, uri, token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json(Method::POST, uri, token, body).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json(Method::PUT, uri, token, body).await
    }

    /// Multipart request with text `fields` and `images` given as (file name, content type, bytes).
    pub async fn multipart(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        fields: &[(&str, String)],
        images: &[(&str, &str, &[u8])],
    ) -> (StatusCode, Value) {
        let mut body: Vec<u8> = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
            );
        }
        for (file_name, content_type, bytes) in images {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{file_name}\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let req = self
            .builder(method, uri, token)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();
        self.send(req).await
    }

    /// Registers a buyer and returns `(user_id, token)`.
    pub async fn register_buyer(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .post("/api/auth/register", None, json!({ "email": email, "full_name": "Test Buyer" }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        (body["user_id"].as_str().unwrap().to_string(), body["token"].as_str().unwrap().to_string())
    }

    pub async fn create_category(&self, name: &str) -> String {
        let (status, body) = self.post("/api/categories", Some(ADMIN_TOKEN), json!({ "name": name })).await;
        assert_eq!(status, StatusCode::CREATED, "create category failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    /// Creates a product with one PNG image and returns its id.
    pub async fn create_product(&self, category_id: &str, name: &str, price_cents: i64, stock: i64) -> String {
        let (status, body) = self
            .multipart(
                Method::POST,
                "/api/products",
                Some(ADMIN_TOKEN),
                &product_fields(category_id, name, price_cents, stock),
                &[("front.png", "image/png", PNG_BYTES)],
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create product failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    /// Places an order for `(product_id, quantity, unit_price)` lines with 500 cents shipping.
    pub async fn place_order(&self, token: &str, lines: &[(&str, i64, i64)]) -> (StatusCode, Value) {
        self.post("/api/orders", Some(token), order_body(lines)).await
    }

    pub async fn stock_of(&self, product_id: &str) -> i64 {
        let (stock,): (i64,) = sqlx::query_as("SELECT stock_quantity FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_one(&self.state.db)
            .await
            .unwrap();
        stock
    }
}

pub fn product_fields(category_id: &str, name: &str, price_cents: i64, stock: i64) -> Vec<(&'static str, String)> {
    vec![
        ("name", name.to_string()),
        ("description", format!("{} description", name)),
        ("price_cents", price_cents.to_string()),
        ("category_id", category_id.to_string()),
        ("stock_quantity", stock.to_string()),
        ("shipping_option", "express".to_string()),
    ]
}

pub fn order_body(lines: &[(&str, i64, i64)]) -> Value {
    let shipping = 500;
    let total: i64 = lines.iter().map(|(_, q, p)| q * p).sum::<i64>() + shipping;
    json!({
        "shipping_address": "Tahrir Square 1, Cairo",
        "shipping_price_cents": shipping,
        "courier_service": "Aramex",
        "tracking_number": "TRK-1",
        "total_price_cents": total,
        "items": lines
            .iter()
            .map(|(id, q, p)| json!({ "product_id": id, "quantity": q, "unit_price_cents": p }))
            .collect::<Vec<_>>(),
    })
}

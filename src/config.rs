use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Static bearer token granting the admin role. Empty disables admin access.
    pub admin_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub root: String,
    pub public_base: String,
    pub max_images_per_product: usize,
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub product_cache_capacity: usize,
    pub top_rated_default: u32,
    pub top_rated_max: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdersConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub default_currency: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub media: MediaConfig,
    pub catalog: CatalogConfig,
    pub orders: OrdersConfig,
    pub payments: PaymentsConfig,
    pub security: Option<SecurityConfig>,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl AppConfig {
    /// Largest accepted request body: a full set of product images plus 1 MiB for form fields.
    pub fn max_body_bytes(&self) -> usize {
        self.media.max_images_per_product.saturating_mul(self.media.max_image_bytes).saturating_add(1024 * 1024)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: warenhaus.toml (in CWD)
        .add_source(::config::File::with_name("warenhaus").required(false));

    if let Ok(custom_path) = std::env::var("WARENHAUS_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("WARENHAUS").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Database
    if let Some(mc) = cfg.database.max_connections {
        if mc == 0 || mc > 256 {
            return Err(anyhow::anyhow!("database.max_connections must be in 1..=256"));
        }
    }

    // Media
    if cfg.media.root.trim().is_empty() {
        return Err(anyhow::anyhow!("media.root must not be empty"));
    }
    if !cfg.media.public_base.starts_with('/') || cfg.media.public_base.trim_end_matches('/').is_empty() {
        return Err(anyhow::anyhow!("media.public_base must be a path prefix like /media"));
    }
    if cfg.media.max_images_per_product == 0 || cfg.media.max_images_per_product > 10 {
        return Err(anyhow::anyhow!("media.max_images_per_product must be in 1..=10"));
    }
    if cfg.media.max_image_bytes == 0 {
        return Err(anyhow::anyhow!("media.max_image_bytes must be > 0"));
    }

    // Catalog
    if cfg.catalog.product_cache_capacity == 0 {
        return Err(anyhow::anyhow!("catalog.product_cache_capacity must be > 0"));
    }
    if cfg.catalog.top_rated_default == 0 || cfg.catalog.top_rated_default > cfg.catalog.top_rated_max {
        return Err(anyhow::anyhow!("catalog.top_rated_default must be in 1..=top_rated_max"));
    }

    // Orders
    if cfg.orders.default_page_size == 0 {
        return Err(anyhow::anyhow!("orders.default_page_size must be > 0"));
    }
    if cfg.orders.default_page_size > cfg.orders.max_page_size {
        return Err(anyhow::anyhow!("orders.default_page_size must be <= max_page_size"));
    }

    // Payments
    let cur = cfg.payments.default_currency.as_str();
    if cur.len() != 3 || !cur.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(anyhow::anyhow!("payments.default_currency must be a 3-letter ISO code, got {:?}", cur));
    }

    if cfg.auth.admin_token.is_empty() {
        tracing::warn!("auth.admin_token is empty - admin endpoints are unreachable");
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // On Windows, handle URLs like sqlite:///C:/... by stripping the leading '/'
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

use sqlx::SqlitePool;

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Foreign keys are critical - fail if this doesn't work
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    let tables: [(&str, &str); 13] = [
        (
            "users",
            r#"CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                full_name TEXT NOT NULL,
                phone_number TEXT NULL,
                birth_date TEXT NULL,
                token_digest TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at TEXT NULL
            )"#,
        ),
        (
            "categories",
            r#"CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at TEXT NULL
            )"#,
        ),
        (
            "products",
            r#"CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                price_cents INTEGER NOT NULL CHECK (price_cents > 0),
                category_id TEXT NOT NULL,
                stock_quantity INTEGER NOT NULL CHECK (stock_quantity >= 0),
                shipping_option TEXT NOT NULL DEFAULT 'standard',
                is_active INTEGER NOT NULL DEFAULT 1,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at TEXT NULL,
                FOREIGN KEY(category_id) REFERENCES categories(id)
            )"#,
        ),
        (
            "product_images",
            r#"CREATE TABLE IF NOT EXISTS product_images (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                url TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                FOREIGN KEY(product_id) REFERENCES products(id) ON DELETE CASCADE
            )"#,
        ),
        (
            "cart_items",
            r#"CREATE TABLE IF NOT EXISTS cart_items (
                buyer_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                added_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (buyer_id, product_id),
                FOREIGN KEY(buyer_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY(product_id) REFERENCES products(id) ON DELETE CASCADE
            )"#,
        ),
        (
            "wishlist_items",
            r#"CREATE TABLE IF NOT EXISTS wishlist_items (
                buyer_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                added_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (buyer_id, product_id),
                FOREIGN KEY(buyer_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY(product_id) REFERENCES products(id) ON DELETE CASCADE
            )"#,
        ),
        (
            "orders",
            r#"CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                buyer_id TEXT NOT NULL,
                status TEXT NOT NULL,
                shipping_address TEXT NOT NULL,
                shipping_price_cents INTEGER NOT NULL,
                courier_service TEXT NOT NULL,
                tracking_number TEXT NOT NULL,
                total_price_cents INTEGER NOT NULL,
                order_date TEXT NOT NULL,
                shipped_date TEXT NULL,
                cancelled_date TEXT NULL,
                cancellation_reason TEXT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NULL,
                FOREIGN KEY(buyer_id) REFERENCES users(id)
            )"#,
        ),
        (
            "order_items",
            r#"CREATE TABLE IF NOT EXISTS order_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                unit_price_cents INTEGER NOT NULL,
                subtotal_cents INTEGER NOT NULL,
                FOREIGN KEY(order_id) REFERENCES orders(id) ON DELETE CASCADE
            )"#,
        ),
        (
            "discounts",
            r#"CREATE TABLE IF NOT EXISTS discounts (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                kind TEXT NOT NULL,
                value INTEGER NOT NULL,
                applicable_product_ids TEXT NOT NULL DEFAULT '[]',
                applicable_category_ids TEXT NOT NULL DEFAULT '[]',
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                usage_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            )"#,
        ),
        (
            "reviews",
            r#"CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                buyer_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NULL,
                UNIQUE (buyer_id, product_id, order_id),
                FOREIGN KEY(buyer_id) REFERENCES users(id),
                FOREIGN KEY(product_id) REFERENCES products(id),
                FOREIGN KEY(order_id) REFERENCES orders(id)
            )"#,
        ),
        (
            "payments",
            r#"CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                buyer_id TEXT NOT NULL,
                order_id TEXT NULL,
                payment_intent_id TEXT NOT NULL UNIQUE,
                client_secret TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                refunded_cents INTEGER NOT NULL DEFAULT 0,
                currency TEXT NOT NULL,
                description TEXT NULL,
                customer_email TEXT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at TEXT NULL,
                FOREIGN KEY(order_id) REFERENCES orders(id)
            )"#,
        ),
        (
            "ledger_intents",
            r#"CREATE TABLE IF NOT EXISTS ledger_intents (
                id TEXT PRIMARY KEY,
                client_secret TEXT NOT NULL,
                amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
                refunded_cents INTEGER NOT NULL DEFAULT 0 CHECK (refunded_cents >= 0 AND refunded_cents <= amount_cents),
                currency TEXT NOT NULL,
                description TEXT NULL,
                customer_email TEXT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at TEXT NULL
            )"#,
        ),
        (
            "order_events",
            r#"CREATE TABLE IF NOT EXISTS order_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                from_status TEXT NULL,
                to_status TEXT NOT NULL,
                actor TEXT NOT NULL,
                note TEXT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                FOREIGN KEY(order_id) REFERENCES orders(id) ON DELETE CASCADE
            )"#,
        ),
    ];

    for (name, ddl) in tables {
        if let Err(e) = sqlx::query(ddl).execute(pool).await {
            tracing::error!("Failed to create table {}: {}", name, e);
            return Err(anyhow::anyhow!("Migration failed for {}: {}", name, e));
        }
    }

    // Uniqueness among live rows; handlers rely on these for their 409s, so failures are fatal.
    let unique_indexes = [
        (
            "ux_categories_name",
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_categories_name ON categories(name COLLATE NOCASE) WHERE is_deleted = 0",
        ),
        ("ux_discounts_code", "CREATE UNIQUE INDEX IF NOT EXISTS ux_discounts_code ON discounts(code) WHERE is_deleted = 0"),
    ];
    for (name, ddl) in unique_indexes {
        if let Err(e) = sqlx::query(ddl).execute(pool).await {
            tracing::error!("Failed to create unique index {}: {}", name, e);
            return Err(anyhow::anyhow!("Migration failed for {}: {}", name, e));
        }
    }

    let indexes = [
        ("idx_products_category", "CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id, is_deleted, is_active)"),
        ("idx_product_images_product", "CREATE INDEX IF NOT EXISTS idx_product_images_product ON product_images(product_id, position)"),
        ("idx_orders_buyer", "CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders(buyer_id, is_deleted, order_date DESC)"),
        ("idx_orders_status", "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status, order_date DESC)"),
        ("idx_order_items_order", "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)"),
        ("idx_reviews_product", "CREATE INDEX IF NOT EXISTS idx_reviews_product ON reviews(product_id, is_deleted)"),
        ("idx_payments_order", "CREATE INDEX IF NOT EXISTS idx_payments_order ON payments(order_id)"),
        ("idx_order_events_order", "CREATE INDEX IF NOT EXISTS idx_order_events_order ON order_events(order_id)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    Ok(())
}

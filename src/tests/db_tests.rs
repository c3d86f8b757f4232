#[cfg(test)]
mod tests {
    use crate::db;
    use sqlx::migrate::MigrateDatabase;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    async fn setup_test_db() -> (sqlx::SqlitePool, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let db_url = format!("sqlite:{}", temp_db.path().display());

        if !sqlx::Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            sqlx::Sqlite::create_database(&db_url).await.unwrap();
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&db_url)
            .await
            .unwrap();

        db::init_db(&pool).await.unwrap();

        (pool, temp_db)
    }

    async fn insert_category(pool: &sqlx::SqlitePool) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO categories (id, name) VALUES (?1, ?2)")
            .bind(&id)
            .bind("Books")
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_init_db() {
        let (pool, _file) = setup_test_db().await;

        let tables: Vec<String> = sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();

        for expected in [
            "users",
            "categories",
            "products",
            "product_images",
            "cart_items",
            "wishlist_items",
            "orders",
            "order_items",
            "order_events",
            "discounts",
            "reviews",
            "payments",
            "ledger_intents",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_init_db_is_idempotent() {
        let (pool, _file) = setup_test_db().await;
        db::init_db(&pool).await.unwrap();

        let indexes: Vec<String> = sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='index'")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(indexes.contains(&"idx_orders_buyer".to_string()));
        assert!(indexes.contains(&"ux_discounts_code".to_string()));
        assert!(indexes.contains(&"ux_categories_name".to_string()));
    }

    #[tokio::test]
    async fn test_live_rows_are_unique() {
        let (pool, _file) = setup_test_db().await;
        insert_category(&pool).await;

        let dup = sqlx::query("INSERT INTO categories (id, name) VALUES (?1, 'BOOKS')")
            .bind(Uuid::new_v4().to_string())
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(dup.as_database_error().unwrap().is_unique_violation());

        // a soft-deleted row frees its name
        sqlx::query("UPDATE categories SET is_deleted = 1").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO categories (id, name) VALUES (?1, 'books')")
            .bind(Uuid::new_v4().to_string())
            .execute(&pool)
            .await
            .unwrap();

        let insert = "INSERT INTO discounts (id, code, kind, value, start_date, end_date) \
                      VALUES (?1, 'SAVE10', 'percentage', 10, '2025-01-01T00:00:00Z', '2099-01-01T00:00:00Z')";
        sqlx::query(insert).bind(Uuid::new_v4().to_string()).execute(&pool).await.unwrap();
        let dup = sqlx::query(insert).bind(Uuid::new_v4().to_string()).execute(&pool).await.unwrap_err();
        assert!(dup.as_database_error().unwrap().is_unique_violation());
    }

    #[tokio::test]
    async fn test_user_email_unique_case_insensitive() {
        let (pool, _file) = setup_test_db().await;
        let insert = "INSERT INTO users (id, email, full_name, token_digest) VALUES (?1, ?2, 'A', ?3)";

        sqlx::query(insert)
            .bind(Uuid::new_v4().to_string())
            .bind("buyer@example.com")
            .bind("digest-1")
            .execute(&pool)
            .await
            .unwrap();
        let err = sqlx::query(insert)
            .bind(Uuid::new_v4().to_string())
            .bind("BUYER@example.com")
            .bind("digest-2")
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(err.as_database_error().unwrap().is_unique_violation());
    }

    #[tokio::test]
    async fn test_product_checks() {
        let (pool, _file) = setup_test_db().await;
        let category = insert_category(&pool).await;
        let insert = "INSERT INTO products (id, name, description, price_cents, category_id, stock_quantity) \
                      VALUES (?1, 'Pen', 'Blue pen', ?2, ?3, ?4)";

        // price must be positive
        assert!(sqlx::query(insert)
            .bind(Uuid::new_v4().to_string())
            .bind(0)
            .bind(&category)
            .bind(5)
            .execute(&pool)
            .await
            .is_err());
        // stock cannot go negative
        assert!(sqlx::query(insert)
            .bind(Uuid::new_v4().to_string())
            .bind(150)
            .bind(&category)
            .bind(-1)
            .execute(&pool)
            .await
            .is_err());

        let id = Uuid::new_v4().to_string();
        sqlx::query(insert).bind(&id).bind(150).bind(&category).bind(5).execute(&pool).await.unwrap();
        let row = sqlx::query("SELECT shipping_option, is_active, is_deleted, created_at FROM products WHERE id = ?1")
            .bind(&id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("shipping_option"), "standard");
        assert!(row.get::<bool, _>("is_active"));
        assert!(!row.get::<bool, _>("is_deleted"));
        assert!(row.get::<String, _>("created_at").ends_with('Z'));
    }

    #[tokio::test]
    async fn test_guarded_stock_decrement() {
        let (pool, _file) = setup_test_db().await;
        let category = insert_category(&pool).await;
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO products (id, name, description, price_cents, category_id, stock_quantity) \
             VALUES (?1, 'Pen', 'Blue pen', 150, ?2, 3)",
        )
        .bind(&id)
        .bind(&category)
        .execute(&pool)
        .await
        .unwrap();

        let decrement = "UPDATE products SET stock_quantity = stock_quantity - ?1 WHERE id = ?2 AND stock_quantity >= ?1";
        let ok = sqlx::query(decrement).bind(2).bind(&id).execute(&pool).await.unwrap();
        assert_eq!(ok.rows_affected(), 1);
        let refused = sqlx::query(decrement).bind(2).bind(&id).execute(&pool).await.unwrap();
        assert_eq!(refused.rows_affected(), 0);

        let stock: i64 = sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = ?1")
            .bind(&id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stock, 1);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{self, AppConfig};
    use std::env;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Tests touching WARENHAUS_* variables run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn write_temp_config(content: &str) -> NamedTempFile {
        let temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        fs::write(temp_file.path(), content).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "sqlite://data/warenhaus.db");
        assert_eq!(config.auth.admin_token, "");
        assert_eq!(config.media.public_base, "/media");
        assert_eq!(config.catalog.top_rated_default, 5);
        assert_eq!(config.catalog.top_rated_max, 50);
        assert_eq!(config.orders.default_page_size, 20);
        assert_eq!(config.payments.default_currency, "egp");
        assert!(config::validate(&config).is_ok());
    }

    #[test]
    fn test_max_body_bytes_covers_all_images() {
        let mut config = AppConfig::default();
        config.media.max_images_per_product = 2;
        config.media.max_image_bytes = 1000;
        assert_eq!(config.max_body_bytes(), 2000 + 1024 * 1024);

        config.media.max_image_bytes = usize::MAX;
        assert_eq!(config.max_body_bytes(), usize::MAX);
    }

    #[test]
    fn test_invalid_server_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        let err = config::validate(&config).unwrap_err();
        assert!(err.to_string().contains("invalid server.port"));
    }

    #[test]
    fn test_invalid_page_sizes() {
        let mut config = AppConfig::default();
        config.orders.default_page_size = 0;
        assert!(config::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.orders.default_page_size = 200;
        config.orders.max_page_size = 100;
        let err = config::validate(&config).unwrap_err();
        assert!(err.to_string().contains("default_page_size must be <= max_page_size"));
    }

    #[test]
    fn test_invalid_media_settings() {
        let mut config = AppConfig::default();
        config.media.max_images_per_product = 11;
        assert!(config::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.media.public_base = "media".into();
        assert!(config::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.media.public_base = "/".into();
        assert!(config::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_currency() {
        let mut config = AppConfig::default();
        config.payments.default_currency = "euro".into();
        let err = config::validate(&config).unwrap_err();
        assert!(err.to_string().contains("3-letter ISO code"));
    }

    #[test]
    fn test_invalid_top_rated_bounds() {
        let mut config = AppConfig::default();
        config.catalog.top_rated_default = 60;
        assert!(config::validate(&config).is_err());
    }

    #[test]
    fn test_config_from_env() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("WARENHAUS__SERVER__PORT", "3000");
        env::set_var("WARENHAUS__AUTH__ADMIN_TOKEN", "from-env");

        let config = config::load();

        env::remove_var("WARENHAUS__SERVER__PORT");
        env::remove_var("WARENHAUS__AUTH__ADMIN_TOKEN");
        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.admin_token, "from-env");
    }

    #[test]
    fn test_config_priority() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_file = write_temp_config(
            r#"
[server]
port = 7000

[payments]
default_currency = "usd"
"#,
        );
        env::set_var("WARENHAUS_CONFIG", temp_file.path().to_str().unwrap());
        env::set_var("WARENHAUS__SERVER__PORT", "8888");

        let config = config::load();

        env::remove_var("WARENHAUS_CONFIG");
        env::remove_var("WARENHAUS__SERVER__PORT");
        let config = config.unwrap();
        // env beats file, file beats embedded defaults
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.payments.default_currency, "usd");
    }

    #[test]
    fn test_load_rejects_invalid_env_override() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("WARENHAUS__CATALOG__PRODUCT_CACHE_CAPACITY", "0");
        let result = config::load();
        env::remove_var("WARENHAUS__CATALOG__PRODUCT_CACHE_CAPACITY");
        assert!(result.unwrap_err().to_string().contains("product_cache_capacity"));
    }

    #[test]
    fn test_ensure_sqlite_parent_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("subdir/test.db");
        let db_url = format!("sqlite://{}", db_path.display());

        assert!(!db_path.parent().unwrap().exists());
        config::ensure_sqlite_parent_dir(&db_url).unwrap();
        assert!(db_path.parent().unwrap().exists());
    }

    #[test]
    fn test_ensure_sqlite_parent_dir_non_sqlite() {
        assert!(config::ensure_sqlite_parent_dir("postgres://localhost/db").is_ok());
    }
}

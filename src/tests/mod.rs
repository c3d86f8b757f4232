//! Integration and unit tests for the Warenhaus backend.
//!
//! ## Test Modules
//!
//! - **helpers**: shared test app (in-memory SQLite, temp media dir, ledger gateway)
//! - **config_tests**: configuration loading and validation
//! - **db_tests**: schema creation and constraints
//! - **error_tests**: error mapping and validation helpers
//! - **health_api_tests**: liveness, readiness, metrics and version
//! - **api_tests**: registration, profile, categories and products
//! - **cart_api_tests**: cart and wishlist
//! - **order_api_tests**: order placement and lifecycle
//! - **discount_api_tests**: discount administration and application
//! - **review_payment_api_tests**: reviews, payment intents and refunds
//!
//! Individual modules can be run with e.g. `cargo test order_api_tests`.

pub mod helpers;

pub mod config_tests;
pub mod db_tests;
pub mod review_payment_api_tests;

//! HTTP handlers, one module per area:
//!
//! - `account`: registration and buyer profile
//! - `categories`, `products`: catalog
//! - `cart`: cart and wishlist
//! - `orders`: placement and lifecycle
//! - `discounts`, `reviews`, `payments`
//! - `health`: liveness, readiness, metrics and version

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::state::AppState;

pub mod account;
pub mod cart;
pub mod categories;
pub mod discounts;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;
pub mod reviews;

/// Every route, without middleware layers.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        // identity
        .route("/api/auth/register", post(account::register))
        .route("/api/profile", get(account::get_profile).put(account::update_profile))
        // catalog
        .route("/api/categories", get(categories::list_categories).post(categories::create_category))
        .route("/api/categories/name/{name}", get(categories::get_category_by_name))
        .route(
            "/api/categories/{id}",
            get(categories::get_category)
                .put(categories::update_category)
                .delete(categories::delete_category),
        )
        .route("/api/products", get(products::list_products).post(products::create_product))
        .route("/api/products/by-ids", post(products::get_products_by_ids))
        .route("/api/products/category/{name}", get(products::list_by_category))
        .route(
            "/api/products/{id}",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        // cart and wishlist
        .route("/api/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/api/cart/items", post(cart::add_item))
        .route("/api/cart/items/{product_id}", put(cart::set_quantity).delete(cart::remove_item))
        .route("/api/wishlist", get(cart::get_wishlist))
        .route("/api/wishlist/items", post(cart::add_to_wishlist))
        .route("/api/wishlist/items/{product_id}", delete(cart::remove_from_wishlist))
        .route("/api/wishlist/items/{product_id}/move-to-cart", post(cart::move_to_cart))
        // orders
        .route("/api/orders", get(orders::list_my_orders).post(orders::create_order))
        .route("/api/orders/{id}", get(orders::get_order).delete(orders::delete_my_order))
        .route("/api/orders/{id}/cancel", put(orders::cancel_my_order))
        .route("/api/admin/orders", get(orders::list_all_orders).post(orders::admin_create_order))
        .route("/api/admin/orders/{id}", put(orders::update_order).delete(orders::admin_delete_order))
        .route("/api/admin/orders/{id}/confirm", put(orders::confirm_order))
        .route("/api/admin/orders/{id}/cancel", put(orders::admin_cancel_order))
        // discounts
        .route("/api/discounts", get(discounts::list_discounts).post(discounts::create_discount))
        .route("/api/discounts/apply", post(discounts::apply_discount))
        .route(
            "/api/discounts/{id}",
            get(discounts::get_discount)
                .put(discounts::update_discount)
                .delete(discounts::delete_discount),
        )
        // reviews
        .route("/api/reviews", post(reviews::add_review))
        .route("/api/reviews/top-rated", get(reviews::top_rated))
        .route("/api/reviews/product/{product_id}", get(reviews::reviews_for_product))
        // payments
        .route("/api/payments/create-intent", post(payments::create_intent))
        .route("/api/payments/confirm/{intent_id}", post(payments::confirm_intent))
        .route("/api/payments/refund/{intent_id}", post(payments::refund_payment))
}

//! Order placement rules that do not need the database.

use std::collections::HashMap;

use crate::error::{validation::Validator, AppError, AppResult};
use crate::money;
use crate::types::{OrderItemRequest, OrderRequest};

/// Current state of a product as seen inside the placement transaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductSnapshot {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub stock_quantity: i64,
}

/// Shape checks on an order request: field lengths, positive amounts and
/// the total matching `sum(unit * qty) + shipping`.
pub fn validate_request(req: &OrderRequest) -> AppResult<()> {
    let mut v = Validator::new();
    v.text(&req.shipping_address, "shipping_address", 500)
        .text(&req.courier_service, "courier_service", 100)
        .check(!req.tracking_number.trim().is_empty(), "tracking_number", "tracking_number is required")
        .check(req.shipping_price_cents >= 0, "shipping_price_cents", "Shipping price must be a non-negative value.")
        .check(!req.items.is_empty(), "items", "Order items cannot be empty.");

    for (i, item) in req.items.iter().enumerate() {
        v.check(item.quantity > 0, &format!("items[{}].quantity", i), "Quantity must be greater than zero.");
        v.check(
            item.unit_price_cents > 0,
            &format!("items[{}].unit_price_cents", i),
            "Unit price must be greater than zero.",
        );
    }
    if !v.is_empty() {
        return v.finish();
    }

    let computed = money::order_total(
        req.items.iter().map(|i| (i.unit_price_cents, i.quantity)),
        req.shipping_price_cents,
    )?;
    v.check(req.total_price_cents > 0, "total_price_cents", "Total price must be greater than zero.");
    v.check(
        req.total_price_cents == computed,
        "total_price_cents",
        format!(
            "Total price must equal the sum of item subtotals plus shipping ({})",
            computed
        ),
    );
    v.finish()
}

/// Folds repeated product ids into one line, keeping first-seen order.
pub fn merge_lines(items: &[OrderItemRequest]) -> AppResult<Vec<OrderItemRequest>> {
    let mut merged: Vec<OrderItemRequest> = Vec::with_capacity(items.len());
    let mut index: HashMap<uuid::Uuid, usize> = HashMap::new();
    for item in items {
        match index.get(&item.product_id) {
            Some(&i) => {
                let line = &mut merged[i];
                if line.unit_price_cents != item.unit_price_cents {
                    return Err(AppError::BadRequest(format!(
                        "Product {} appears with different unit prices",
                        item.product_id
                    )));
                }
                line.quantity = line
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or_else(|| AppError::InvalidInput("Quantity overflows".into()))?;
            }
            None => {
                index.insert(item.product_id, merged.len());
                merged.push(item.clone());
            }
        }
    }
    Ok(merged)
}

/// Stock sufficiency and price consistency for every line; returns all violations.
pub fn business_rule_violations(
    lines: &[OrderItemRequest],
    products: &HashMap<String, ProductSnapshot>,
) -> Vec<String> {
    let mut errors = Vec::new();
    for line in lines {
        let Some(product) = products.get(&line.product_id.to_string()) else {
            errors.push(format!("Product {} not found", line.product_id));
            continue;
        };
        if product.stock_quantity < line.quantity {
            errors.push(format!(
                "{}: Insufficient stock (Available: {}, Requested: {})",
                product.name, product.stock_quantity, line.quantity
            ));
        }
        if product.price_cents != line.unit_price_cents {
            errors.push(format!(
                "{}: Price has changed (Current: {}, Provided: {})",
                product.name,
                money::format_cents(product.price_cents),
                money::format_cents(line.unit_price_cents)
            ));
        }
    }
    errors
}

//! Discount rules and arithmetic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{validation::Validator, AppResult};
use crate::money;
use crate::types::DiscountKind;

/// Reduction granted by a discount on `total_cents`, never more than the total.
pub fn discount_amount(kind: DiscountKind, value: i64, total_cents: i64) -> i64 {
    let raw = match kind {
        DiscountKind::Percentage => money::percent_of(total_cents, value),
        DiscountKind::FixedAmount => value,
    };
    raw.clamp(0, total_cents.max(0))
}

/// `(discount, new_total)` for `total_cents`; the new total is clamped at zero.
pub fn apply(kind: DiscountKind, value: i64, total_cents: i64) -> (i64, i64) {
    let discount = discount_amount(kind, value, total_cents);
    (discount, (total_cents - discount).max(0))
}

/// A discount without restrictions applies to everything; otherwise at least
/// one of the cart's products or categories has to be listed.
pub fn is_applicable(
    restricted_products: &[String],
    restricted_categories: &[String],
    product_ids: &[Uuid],
    category_ids: &[Uuid],
) -> bool {
    if restricted_products.is_empty() && restricted_categories.is_empty() {
        return true;
    }
    let hit = |restricted: &[String], given: &[Uuid]| {
        given.iter().any(|id| restricted.iter().any(|r| r.eq_ignore_ascii_case(&id.to_string())))
    };
    hit(restricted_products, product_ids) || hit(restricted_categories, category_ids)
}

/// Rules shared by create and update. `require_future_end` is only enforced on create.
pub fn validate_terms(
    v: &mut Validator,
    kind: DiscountKind,
    value: i64,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    now: &DateTime<Utc>,
    require_future_end: bool,
) {
    match kind {
        DiscountKind::Percentage => {
            v.check((1..=100).contains(&value), "value", "Percentage must be between 1 and 100.");
        }
        DiscountKind::FixedAmount => {
            v.check(value > 0, "value", "Fixed amount must be greater than 0.");
        }
    }
    if require_future_end {
        v.check(start <= end, "start_date", "Start date must not be after end date.");
        v.check(end >= now, "end_date", "End date must not be in the past.");
    } else {
        v.check(start < end, "start_date", "Start date must be before end date.");
    }
}

/// Normalized form used to store and look up codes.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn validate_code(code: &str) -> AppResult<()> {
    let mut v = Validator::new();
    let c = code.trim();
    v.check(!c.is_empty(), "code", "Code is required.");
    v.check(c.len() <= 64, "code", "Code must not exceed 64 characters.");
    v.check(
        c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'),
        "code",
        "Code may only contain letters, digits, '-' and '_'.",
    );
    v.finish()
}

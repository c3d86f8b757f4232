//! Monetary arithmetic on integer minor units.
//!
//! Every price, subtotal and total in the API and the database is an `i64`
//! amount of cents. Nothing here ever touches floating point, so price
//! consistency checks can compare amounts exactly.

use crate::error::{AppError, AppResult};

/// Multiplies a unit price by a quantity, refusing to overflow.
pub fn line_subtotal(unit_price_cents: i64, quantity: i64) -> AppResult<i64> {
    unit_price_cents
        .checked_mul(quantity)
        .ok_or_else(|| AppError::InvalidInput("Line subtotal overflows".into()))
}

/// Sums line subtotals plus shipping.
pub fn order_total<I>(lines: I, shipping_cents: i64) -> AppResult<i64>
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let mut total = shipping_cents;
    for (unit, qty) in lines {
        total = total
            .checked_add(line_subtotal(unit, qty)?)
            .ok_or_else(|| AppError::InvalidInput("Order total overflows".into()))?;
    }
    Ok(total)
}

/// `amount * percent / 100`, rounded half away from zero.
pub fn percent_of(amount_cents: i64, percent: i64) -> i64 {
    let raw = amount_cents as i128 * percent as i128;
    let rounded = if raw >= 0 { (raw + 50) / 100 } else { (raw - 50) / 100 };
    rounded as i64
}

/// Formats cents as a plain decimal string for logs, e.g. `1999` -> `19.99`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_total_includes_shipping() {
        let total = order_total(vec![(1999, 2), (500, 1)], 750).unwrap();
        assert_eq!(total, 1999 * 2 + 500 + 750);
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(line_subtotal(i64::MAX, 2).is_err());
        assert!(order_total(vec![(i64::MAX, 1)], 1).is_err());
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent_of(1000, 15), 150);
        assert_eq!(percent_of(999, 10), 100); // 99.9 -> 100
        assert_eq!(percent_of(1005, 10), 101); // 100.5 -> 101
        assert_eq!(percent_of(0, 50), 0);
    }

    #[test]
    fn formats_cents() {
        assert_eq!(format_cents(1999), "19.99");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-250), "-2.50");
    }
}

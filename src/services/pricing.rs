use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::entities::product;

/// Money values carry two fractional digits, rounded half-up.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes the price a buyer pays for one unit of a product at `now`.
///
/// A discount applies when the percentage is present and positive and `now`
/// falls inside the window. A missing start or end bound leaves that side
/// unbounded. Outside the window the list price applies unchanged.
pub fn effective_unit_price(product: &product::Model, now: DateTime<Utc>) -> Decimal {
    let pct = match product.discount_percent {
        Some(pct) if pct > Decimal::ZERO => pct,
        _ => return product.price,
    };

    if let Some(start) = product.discount_start {
        if now < start {
            return product.price;
        }
    }
    if let Some(end) = product.discount_end {
        if now > end {
            return product.price;
        }
    }

    let factor = Decimal::ONE - pct / Decimal::ONE_HUNDRED;
    round_money(product.price * factor)
}

//! USD → credit conversion.
//!
//! One credit represents `credit_rate` USD of upstream spend. Conversion
//! rounds up (ceiling): any non-zero spend is charged at least one credit,
//! and the platform never under-charges by a fractional credit.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Minimum credits required at the admission gate.
pub const DEFAULT_MIN_CREDITS: i64 = 1;

/// The default credit exchange rate: 1 credit = $0.0015.
#[must_use]
pub fn default_credit_rate() -> Decimal {
    // 15 * 10^-4
    Decimal::new(15, 4)
}

/// Convert a USD amount to credits, rounding up.
///
/// Non-positive amounts convert to zero credits; a non-positive rate also
/// yields zero rather than dividing by it.
#[must_use]
pub fn credits_for_usd(usd: Decimal, credit_rate: Decimal) -> i64 {
    if usd <= Decimal::ZERO || credit_rate <= Decimal::ZERO {
        return 0;
    }
    (usd / credit_rate).ceil().to_i64().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn usd(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn fractional_spend_rounds_up_to_one() {
        // 0.0001 / 0.0015 = 0.0666… -> 1 credit, never 0
        assert_eq!(credits_for_usd(usd("0.0001"), default_credit_rate()), 1);
    }

    #[test]
    fn exact_multiple_does_not_round_up() {
        assert_eq!(credits_for_usd(usd("0.0015"), default_credit_rate()), 1);
        assert_eq!(credits_for_usd(usd("0.0030"), default_credit_rate()), 2);
    }

    #[test]
    fn just_over_a_multiple_rounds_up() {
        assert_eq!(credits_for_usd(usd("0.0016"), default_credit_rate()), 2);
    }

    #[test]
    fn zero_and_negative_spend_cost_nothing() {
        assert_eq!(credits_for_usd(Decimal::ZERO, default_credit_rate()), 0);
        assert_eq!(credits_for_usd(usd("-1.0"), default_credit_rate()), 0);
    }

    #[test]
    fn degenerate_rate_charges_nothing() {
        assert_eq!(credits_for_usd(usd("1.0"), Decimal::ZERO), 0);
    }

    #[test]
    fn larger_amounts() {
        // $1.50 at 0.0015/credit = exactly 1000 credits
        assert_eq!(credits_for_usd(usd("1.50"), default_credit_rate()), 1000);
        assert_eq!(credits_for_usd(usd("1.500001"), default_credit_rate()), 1001);
    }
}

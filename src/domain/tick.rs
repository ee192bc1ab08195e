//! Tick-size policy (C4): rounds a price to the nearest valid tick for its
//! market, round-half-to-even. Hong Kong uses HKEX's stepped ladder; the US
//! uses a flat cent.

use crate::domain::types::Market;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn hk_tick_for(price: Decimal) -> Decimal {
    // HKEX stepped ladder (board lot spread table), ascending by price.
    const STEPS: &[(Decimal, Decimal)] = &[
        (dec!(0.25), dec!(0.001)),
        (dec!(0.50), dec!(0.005)),
        (dec!(10.00), dec!(0.01)),
        (dec!(20.00), dec!(0.02)),
        (dec!(100.00), dec!(0.05)),
        (dec!(200.00), dec!(0.10)),
        (dec!(500.00), dec!(0.20)),
        (dec!(1000.00), dec!(0.50)),
        (dec!(2000.00), dec!(1.00)),
        (dec!(5000.00), dec!(2.00)),
    ];
    for (upper, tick) in STEPS {
        if price < *upper {
            return *tick;
        }
    }
    dec!(5.00)
}

/// Rounds `price` to the nearest valid tick for `market`, half-to-even.
pub fn round_to_tick(market: Market, price: Decimal) -> Decimal {
    let tick = match market {
        Market::Hk => hk_tick_for(price),
        Market::Us => dec!(0.01),
    };
    if tick.is_zero() {
        return price;
    }
    let steps = (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    (steps * tick).round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_rounds_to_cent() {
        assert_eq!(round_to_tick(Market::Us, dec!(10.004)), dec!(10.00));
        assert_eq!(round_to_tick(Market::Us, dec!(10.005)), dec!(10.00));
        assert_eq!(round_to_tick(Market::Us, dec!(10.015)), dec!(10.02));
    }

    #[test]
    fn hk_uses_stepped_ladder() {
        assert_eq!(round_to_tick(Market::Hk, dec!(5.00)), dec!(5.00));
        assert_eq!(round_to_tick(Market::Hk, dec!(15.00)), dec!(15.00));
        assert_eq!(round_to_tick(Market::Hk, dec!(15.013)), dec!(15.02));
    }

    #[test]
    fn rounding_is_idempotent() {
        for market in [Market::Hk, Market::Us] {
            let once = round_to_tick(market, dec!(123.456));
            let twice = round_to_tick(market, once);
            assert_eq!(once, twice);
        }
    }
}

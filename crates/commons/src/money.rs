use anyhow::bail;
use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

/// Round to two decimal places, half-up, as the gateway settles amounts.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a rupee amount into paise for the gateway wire format.
///
/// Fails on amounts that do not land on a whole paise after rounding to
/// scale 2, or that overflow an i64.
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    let paise = round2(amount) * Decimal::ONE_HUNDRED;
    if paise.fract() != Decimal::ZERO {
        bail!("amount {amount} is not representable in paise");
    }
    match paise.to_i64() {
        Some(paise) => Ok(paise),
        None => bail!("amount {amount} overflows minor units"),
    }
}

pub fn from_minor_units(paise: i64) -> Decimal {
    Decimal::new(paise, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up_at_scale_two() {
        assert_eq!(round2(dec!(40.005)), dec!(40.01));
        assert_eq!(round2(dec!(40.004)), dec!(40.00));
        assert_eq!(round2(dec!(360)), dec!(360));
    }

    #[test]
    fn converts_rupees_to_paise() {
        assert_eq!(to_minor_units(dec!(400)).unwrap(), 40_000);
        assert_eq!(to_minor_units(dec!(360.50)).unwrap(), 36_050);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
    }

    #[test]
    fn paise_round_trip() {
        assert_eq!(from_minor_units(36_050), dec!(360.50));
        assert_eq!(to_minor_units(from_minor_units(12_345)).unwrap(), 12_345);
    }
}

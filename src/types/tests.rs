use super::{Amount, AmountError};
use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use std::num::NonZeroU32;
use std::str::FromStr;

#[test]
fn test_amount_successfully_parses_valid_strings() -> Result<()> {
    let test_cases = vec![
        ("1.0", "1.00"),
        ("12.34", "12.34"),
        ("0.01", "0.01"),
        ("  7.5  ", "7.50"),
        ("100", "100.00"),
        ("999.990", "999.99"),
    ];

    for (input_string, expected_output) in test_cases {
        assert_eq!(Amount::from_str(input_string)?.to_string(), expected_output);
    }

    Ok(())
}

#[test]
fn test_amount_fails_to_parse_invalid_strings() {
    assert!(matches!(Amount::from_str(""), Err(AmountError::InvalidFormat(_))));
    assert!(matches!(Amount::from_str("abc"), Err(AmountError::InvalidFormat(_))));
    assert!(matches!(Amount::from_str("1.2.3"), Err(AmountError::InvalidFormat(_))));
    assert!(matches!(Amount::from_str("1.234"), Err(AmountError::TooPrecise(_))));
}

#[test]
fn test_amount_rejects_zero_and_negative_values() {
    assert!(matches!(Amount::from_str("0"), Err(AmountError::NotPositive(_))));
    assert!(matches!(Amount::from_str("0.00"), Err(AmountError::NotPositive(_))));
    assert!(matches!(Amount::from_str("-5.00"), Err(AmountError::NotPositive(_))));
}

#[test]
fn test_amount_equality_ignores_trailing_zeros() -> Result<()> {
    assert_eq!(Amount::from_str("10.5")?, Amount::from_str("10.50")?);
    assert_eq!(Amount::from_cents(NonZeroU32::new(1050).ok_or_else(|| anyhow!("zero cents"))?), Amount::from_str("10.50")?);
    assert_eq!(Amount::from_str("10.5")?.as_decimal().scale(), 2);

    Ok(())
}

#[test]
fn test_amount_travels_as_a_json_string() -> Result<()> {
    let amount = Amount::new(Decimal::from_str("42.1")?)?;

    assert_eq!(serde_json::to_string(&amount)?, "\"42.10\"");
    assert_eq!(serde_json::from_str::<Amount>("\"42.10\"")?, amount);
    assert!(serde_json::from_str::<Amount>("42.10").is_err());

    Ok(())
}

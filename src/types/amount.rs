use crate::types::errors::AmountError;
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::str::FromStr;

const DECIMAL_PLACES: u32 = 2;

/// A strictly positive money value held at exactly two decimal places.
///
/// On the wire and in CSV files the amount travels as a string (`"12.30"`),
/// so it survives any transport that would otherwise coerce it to a float.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_zero() || value.is_sign_negative() {
            return Err(AmountError::NotPositive(value.to_string()));
        }

        let mut normalized = value.normalize();

        if normalized.scale() > DECIMAL_PLACES {
            return Err(AmountError::TooPrecise(value.to_string()));
        }

        normalized.rescale(DECIMAL_PLACES);

        Ok(Amount(normalized))
    }

    /// Builds an amount from a count of minor units (cents).
    pub fn from_cents(cents: NonZeroU32) -> Self {
        Amount(Decimal::new(i64::from(cents.get()), DECIMAL_PLACES))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl Display for Amount {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();

        if value.is_empty() {
            return Err(AmountError::InvalidFormat("Value is an empty string".to_string()));
        }

        let decimal = Decimal::from_str(value).map_err(|error| {
            AmountError::InvalidFormat(format!("Value [{value}] is not a decimal: {error}"))
        })?;

        Amount::new(decimal)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Amount::from_str(&value).map_err(de::Error::custom)
    }
}

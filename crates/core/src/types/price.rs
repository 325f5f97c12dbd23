//! Money amounts as mirrored from backend pricing snapshots.
//!
//! The backend owns all pricing; these types only carry and format what it
//! returns. Amounts are decimal, never floating point.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A money amount with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's standard unit (e.g., hryvnias, not kopecks).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: CurrencyCode,
}

impl Money {
    /// Create a new amount.
    #[must_use]
    pub const fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    /// Zero in the given currency.
    #[must_use]
    pub const fn zero(currency: CurrencyCode) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    /// Whether the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Format for display, e.g. `1 250.00 ₴` or `$19.99`.
    #[must_use]
    pub fn display(&self) -> String {
        let amount = format!("{:.2}", self.amount.round_dp(2));
        if self.currency.symbol_first() {
            format!("{}{amount}", self.currency.symbol())
        } else {
            format!("{amount} {}", self.currency.symbol())
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// ISO 4217 currency codes the storefront can display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyCode {
    #[default]
    UAH,
    USD,
    EUR,
    PLN,
    GBP,
}

impl CurrencyCode {
    /// Currency symbol.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::UAH => "₴",
            Self::USD => "$",
            Self::EUR => "€",
            Self::PLN => "zł",
            Self::GBP => "£",
        }
    }

    /// Three-letter code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UAH => "UAH",
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::PLN => "PLN",
            Self::GBP => "GBP",
        }
    }

    const fn symbol_first(self) -> bool {
        matches!(self, Self::USD | Self::GBP)
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UAH" => Ok(Self::UAH),
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "PLN" => Ok(Self::PLN),
            "GBP" => Ok(Self::GBP),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_symbol_position() {
        let uah = Money::new(Decimal::new(125_050, 2), CurrencyCode::UAH);
        assert_eq!(uah.display(), "1250.50 ₴");

        let usd = Money::new(Decimal::new(1999, 2), CurrencyCode::USD);
        assert_eq!(usd.display(), "$19.99");
    }

    #[test]
    fn test_display_rounds_to_cents() {
        let eur = Money::new(Decimal::new(10_005, 3), CurrencyCode::EUR);
        assert_eq!(eur.display(), "10.00 €");
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!("uah".parse::<CurrencyCode>().unwrap(), CurrencyCode::UAH);
        assert!("XYZ".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn test_money_deserializes_string_and_number_amounts() {
        let a: Money = serde_json::from_str(r#"{"amount":"12.50","currency":"UAH"}"#).unwrap();
        let b: Money = serde_json::from_str(r#"{"amount":12.5,"currency":"UAH"}"#).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_zero());
        assert!(Money::zero(CurrencyCode::UAH).is_zero());
    }
}

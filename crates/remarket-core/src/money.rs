//! # Money Module
//!
//! Listing prices held as integer minor units.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The product API speaks decimal numbers:   "price": 449.9              │
//! │  The local table stores integer cents:     price_cents = 44990         │
//! │                                                                         │
//! │  Conversion happens exactly once, at the wire boundary, so a listing   │
//! │  that is pulled, stored and pushed again keeps the same price.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use remarket_core::money::Money;
//!
//! let price = Money::from_cents(44_990);
//! assert_eq!(price.to_string(), "449.90");
//!
//! let parsed = Money::from_decimal(449.9).unwrap();
//! assert_eq!(parsed, price);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Converts a decimal amount (as sent by the product API) to cents.
    ///
    /// Rounds half away from zero. Returns `None` for NaN, infinities and
    /// values outside the `i64` cent range.
    ///
    /// ```rust
    /// use remarket_core::money::Money;
    ///
    /// assert_eq!(Money::from_decimal(12.345).unwrap().cents(), 1235);
    /// assert!(Money::from_decimal(f64::NAN).is_none());
    /// ```
    pub fn from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let cents = (value * 100.0).round();
        if cents < i64::MIN as f64 || cents > i64::MAX as f64 {
            return None;
        }
        Some(Money(cents as i64))
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the value as a decimal number for the wire.
    pub fn to_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

// =============================================================================
// Wire Format
// =============================================================================

/// Serde adapter that writes `Money` as a JSON decimal number.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Dto {
///     #[serde(with = "remarket_core::money::decimal")]
///     price: Money,
/// }
/// ```
pub mod decimal {
    use super::Money;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(money: &Money, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(money.to_decimal())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Money, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Money::from_decimal(value)
            .ok_or_else(|| D::Error::custom(format!("price out of range: {value}")))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! Supported payment tokens and amount conversions.
//!
//! Maps token symbols and contract addresses to one canonical form and
//! resolves integer base-unit amounts from decimal human amounts. Both the
//! payment-initiation and tournament-join paths recompute amounts through
//! here rather than trusting client-supplied base units.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("unsupported token: {0}")]
    UnsupportedToken(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Static metadata for one supported token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: &'static str,
    /// Canonical lowercase contract address.
    pub address: &'static str,
    pub decimals: u32,
}

/// Tokens accepted for entry payments.
pub const SUPPORTED_TOKENS: &[TokenInfo] = &[
    TokenInfo {
        symbol: "WLD",
        address: "0x2cfc85d8e48f8eab294be644d9e25c3030863003",
        decimals: 18,
    },
    TokenInfo {
        symbol: "USDC.e",
        address: "0x79a02482a880bce3f13e09da970dc34db4cd24d1",
        decimals: 6,
    },
];

/// Looks up a token by symbol or contract address, case-insensitively.
pub fn find(identifier: &str) -> Option<&'static TokenInfo> {
    let trimmed = identifier.trim();
    SUPPORTED_TOKENS.iter().find(|token| {
        token.symbol.eq_ignore_ascii_case(trimmed) || token.address.eq_ignore_ascii_case(trimmed)
    })
}

/// Resolves a symbol or address to the canonical lowercase contract address.
pub fn normalize(identifier: &str) -> Result<String, TokenError> {
    find(identifier)
        .map(|token| token.address.to_string())
        .ok_or_else(|| TokenError::UnsupportedToken(identifier.to_string()))
}

/// Converts a decimal human amount to integer base units for `identifier`,
/// rounding to the nearest integer. The result is a decimal string because
/// 18-decimal amounts exceed u64.
pub fn to_base_units(amount: f64, identifier: &str) -> Result<String, TokenError> {
    let token =
        find(identifier).ok_or_else(|| TokenError::UnsupportedToken(identifier.to_string()))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(TokenError::InvalidAmount(amount.to_string()));
    }
    let scaled = (amount * 10f64.powi(token.decimals as i32)).round();
    if scaled > u128::MAX as f64 {
        return Err(TokenError::InvalidAmount(amount.to_string()));
    }
    Ok(format!("{}", scaled as u128))
}

/// Sums two integer-string base-unit amounts. None when either operand is
/// not a valid integer or the sum overflows u128.
pub fn add_base_units(a: &str, b: &str) -> Option<String> {
    let a: u128 = a.parse().ok()?;
    let b: u128 = b.parse().ok()?;
    a.checked_add(b).map(|sum| sum.to_string())
}

/*
[INPUT]:  Decimal strings and JSON scalars from exchange payloads
[OUTPUT]: Exact price/quantity parsing, arithmetic and comparison
[POS]:    Leaf layer - decimal arithmetic shared by decoding and book math
[UPDATE]: When adding operations or accepting new number encodings
*/

//! String-in, string-out decimal arithmetic backed by `rust_decimal`.
//!
//! Money values never pass through `f64`. JSON numbers are re-read from their
//! textual form so a payload like `0.1` stays exactly `0.1`.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::http::{AdapterError, Result};

/// Parse a decimal from its string form, accepting scientific notation.
pub fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AdapterError::parse(field, raw));
    }

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| AdapterError::parse(field, raw))
}

/// Parse a decimal from a JSON string or number.
pub fn decimal_from_value(field: &str, value: &Value) -> Result<Decimal> {
    match value {
        Value::String(text) => parse_decimal(field, text),
        Value::Number(number) => parse_decimal(field, &number.to_string()),
        other => Err(AdapterError::parse(field, other.to_string())),
    }
}

/// Parse an integer timestamp from a JSON number or numeric string.
pub fn i64_from_value(field: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.is_finite())
                    .map(|float| float.floor() as i64)
            })
            .ok_or_else(|| AdapterError::parse(field, number.to_string())),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| AdapterError::parse(field, text.as_str())),
        other => Err(AdapterError::parse(field, other.to_string())),
    }
}

/// Floor a millisecond timestamp to whole seconds.
pub fn millis_to_seconds(millis: i64) -> i64 {
    millis.div_euclid(1000)
}

pub fn add(lhs: &str, rhs: &str) -> Result<String> {
    let (a, b) = operands(lhs, rhs)?;
    a.checked_add(b)
        .map(render)
        .ok_or_else(|| AdapterError::Arithmetic(format!("{lhs} + {rhs} overflowed")))
}

pub fn subtract(lhs: &str, rhs: &str) -> Result<String> {
    let (a, b) = operands(lhs, rhs)?;
    a.checked_sub(b)
        .map(render)
        .ok_or_else(|| AdapterError::Arithmetic(format!("{lhs} - {rhs} overflowed")))
}

pub fn multiply(lhs: &str, rhs: &str) -> Result<String> {
    let (a, b) = operands(lhs, rhs)?;
    a.checked_mul(b)
        .map(render)
        .ok_or_else(|| AdapterError::Arithmetic(format!("{lhs} * {rhs} overflowed")))
}

pub fn divide(lhs: &str, rhs: &str) -> Result<String> {
    let (a, b) = operands(lhs, rhs)?;
    if b.is_zero() {
        return Err(AdapterError::Arithmetic(format!("{lhs} / {rhs}: division by zero")));
    }
    a.checked_div(b)
        .map(render)
        .ok_or_else(|| AdapterError::Arithmetic(format!("{lhs} / {rhs} overflowed")))
}

pub fn compare(lhs: &str, rhs: &str) -> Result<Ordering> {
    let (a, b) = operands(lhs, rhs)?;
    Ok(a.cmp(&b))
}

/// Midpoint of two prices, `None` on overflow.
pub fn midpoint(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_add(b)?.checked_div(Decimal::TWO)
}

fn operands(lhs: &str, rhs: &str) -> Result<(Decimal, Decimal)> {
    Ok((parse_decimal("lhs", lhs)?, parse_decimal("rhs", rhs)?))
}

fn render(value: Decimal) -> String {
    value.normalize().to_string()
}

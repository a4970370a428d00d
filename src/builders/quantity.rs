//! Resource quantities: parsing to milli-units and deriving CPU limits

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Ratio between CPU limits and CPU requests
pub const REQUESTS_TO_LIMITS_RATIO: i128 = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// Multiplier of a suffix as numerator/denominator
fn suffix_factor(suffix: &str) -> Option<(i128, i128)> {
    let factor = match suffix {
        "" => (1, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return None,
    };
    Some(factor)
}

/// Factor of a decimal exponent suffix such as `e3` or `E-2`
fn exponent_factor(suffix: &str) -> Option<(i128, i128)> {
    let exp: i32 = suffix.strip_prefix(['e', 'E'])?.parse().ok()?;
    let power = 10_i128.checked_pow(exp.unsigned_abs())?;
    Some(if exp >= 0 { (power, 1) } else { (1, power) })
}

/// Parse a quantity and return its value in milli-units, rounded up
///
/// `"250m"` is 250, `"1"` is 1000, `"2Gi"` is 2147483648000.
pub fn parse_millis(input: &str) -> Result<i128, QuantityError> {
    let invalid = || QuantityError::Invalid(input.to_string());
    let overflow = || QuantityError::OutOfRange(input.to_string());

    let s = input.trim();
    let (negative, body) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let number_end = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(number_end);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.contains('.') {
        return Err(invalid());
    }

    let (mul, div) = suffix_factor(suffix)
        .or_else(|| exponent_factor(suffix))
        .ok_or_else(invalid)?;

    let digits = format!("{whole}{fraction}");
    let mantissa: i128 = digits.parse().map_err(|_| overflow())?;
    let scale = 10_i128
        .checked_pow(u32::try_from(fraction.len()).map_err(|_| overflow())?)
        .ok_or_else(overflow)?;

    let numerator = mantissa
        .checked_mul(mul)
        .and_then(|n| n.checked_mul(1000))
        .ok_or_else(overflow)?;
    let denominator = scale.checked_mul(div).ok_or_else(overflow)?;

    // Both operands are non-negative, so this rounds up without overflowing
    let millis = numerator / denominator + i128::from(numerator % denominator != 0);
    Ok(if negative { -millis } else { millis })
}

/// Canonical decimal form of a milli-unit value
///
/// `400` is `"400m"`, `4000` is `"4"`, `4_000_000` is `"4k"`.
pub fn format_millis(millis: i128) -> String {
    if millis == 0 {
        return "0".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{millis}m");
    }

    let mut value = millis / 1000;
    let mut suffix = "";
    for next in ["k", "M", "G", "T", "P", "E"] {
        if value % 1000 != 0 {
            break;
        }
        value /= 1000;
        suffix = next;
    }
    format!("{value}{suffix}")
}

/// CPU limit derived from a CPU request at the 1:4 ratio
///
/// An unparseable request yields `"0"`.
pub fn cpu_limits_from_requests(requests: &str) -> String {
    match parse_millis(requests) {
        Ok(millis) => millis
            .checked_mul(REQUESTS_TO_LIMITS_RATIO)
            .map_or_else(|| "0".to_string(), format_millis),
        Err(_) => "0".to_string(),
    }
}

/// Resource list with the given entries; empty or invalid values are left out
pub fn resource_list(
    cpu: &str,
    memory: &str,
    storage: &str,
    ephemeral_storage: &str,
) -> BTreeMap<String, Quantity> {
    [
        ("cpu", cpu),
        ("memory", memory),
        ("storage", storage),
        ("ephemeral-storage", ephemeral_storage),
    ]
    .into_iter()
    .filter(|(_, value)| parse_millis(value).is_ok())
    .map(|(name, value)| (name.to_string(), Quantity(value.trim().to_string())))
    .collect()
}

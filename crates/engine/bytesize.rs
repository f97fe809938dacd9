//! Human byte-size strings such as `500MB` or `1.5 GiB`.
//!
//! Every unit is a power of 1024, whether or not it carries the `i`.

use thiserror::Error;

const KIB: u64 = 1 << 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ByteSizeError {
    #[error("Empty size")]
    Empty,
    #[error("Invalid size number {0}")]
    InvalidNumber(String),
    #[error("Unrecognized size suffix {0}")]
    UnknownSuffix(String),
    #[error("Size {0} overflows 64 bits")]
    Overflow(String),
}

pub fn parse_byte_size(raw: &str) -> Result<u64, ByteSizeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ByteSizeError::Empty);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let suffix = suffix.trim();

    let multiplier = unit_multiplier(suffix)
        .ok_or_else(|| ByteSizeError::UnknownSuffix(suffix.to_owned()))?;

    if number.is_empty() {
        return Err(ByteSizeError::InvalidNumber(trimmed.to_owned()));
    }

    if number.contains('.') {
        let value = number
            .parse::<f64>()
            .map_err(|_| ByteSizeError::InvalidNumber(number.to_owned()))?;
        let bytes = value * multiplier as f64;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(ByteSizeError::Overflow(trimmed.to_owned()));
        }
        return Ok(bytes.floor() as u64);
    }

    let value = number
        .parse::<u64>()
        .map_err(|_| ByteSizeError::InvalidNumber(number.to_owned()))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| ByteSizeError::Overflow(trimmed.to_owned()))
}

fn unit_multiplier(suffix: &str) -> Option<u64> {
    let exponent = match suffix.to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 1,
        "M" | "MB" | "MIB" => 2,
        "G" | "GB" | "GIB" => 3,
        "T" | "TB" | "TIB" => 4,
        "P" | "PB" | "PIB" => 5,
        "E" | "EB" | "EIB" => 6,
        _ => return None,
    };
    Some(KIB.pow(exponent))
}

/// Formats a byte count with the largest unit that keeps the value >= 1.
pub fn format_byte_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= KIB as f64 && unit < UNITS.len() - 1 {
        value /= KIB as f64;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

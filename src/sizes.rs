//! Size string parsing and formatting.
//!
//! `parse_size` accepts a plain byte count or a number with a unit suffix,
//! decimal (KB, MB, GB, TB) or binary (KiB, MiB, GiB, TiB), in any case,
//! with fractional values allowed.

use anyhow::{bail, Result};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Unit suffixes and their byte multipliers. Matching is case-insensitive
/// and the short forms (`k`, `Mi`, ...) are aliases for the full units.
const SUFFIXES: &[(&str, u64)] = &[
    ("B", 1),
    ("K", 1_000),
    ("KB", 1_000),
    ("KI", KIB),
    ("KIB", KIB),
    ("M", 1_000_000),
    ("MB", 1_000_000),
    ("MI", MIB),
    ("MIB", MIB),
    ("G", 1_000_000_000),
    ("GB", 1_000_000_000),
    ("GI", GIB),
    ("GIB", GIB),
    ("T", 1_000_000_000_000),
    ("TB", 1_000_000_000_000),
    ("TI", TIB),
    ("TIB", TIB),
];

/// Parse a size string into bytes.
///
/// Examples: `"1048576"`, `"8MB"` (8,000,000), `"8MiB"` (8,388,608),
/// `"1.5GiB"`.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        bail!("empty size");
    }

    // The numeric part runs up to the first letter; the rest is the unit.
    let unit_at = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(unit_at);
    let number = number.trim();

    if number.is_empty() {
        bail!("size `{}` is missing a number", input);
    }

    // A bare integer is taken as an exact byte count.
    if unit.is_empty() {
        return match number.parse::<u64>() {
            Ok(n) => Ok(n),
            Err(_) => bail!("size `{}` is not a whole byte count", input),
        };
    }

    let Ok(value) = number.parse::<f64>() else {
        bail!("size `{}` has a malformed number", input);
    };
    if !value.is_finite() || value.is_sign_negative() {
        bail!("size `{}` must be a non-negative finite value", input);
    }

    Ok((value * suffix_multiplier(input, unit)? as f64).round() as u64)
}

fn suffix_multiplier(input: &str, unit: &str) -> Result<u64> {
    let wanted = unit.to_ascii_uppercase();
    for (name, multiplier) in SUFFIXES {
        if wanted == *name {
            return Ok(*multiplier);
        }
    }
    bail!(
        "size `{}` has an unrecognized unit `{}` (expected B, KB/KiB, MB/MiB, GB/GiB or TB/TiB)",
        input,
        unit
    );
}

const BINARY_UNITS: &[(u64, &str)] = &[(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")];

/// Convert bytes to a human-readable string using binary units.
pub fn format_bytes(bytes: u64) -> String {
    for (scale, unit) in BINARY_UNITS {
        if bytes >= *scale {
            return format!("{:.2} {}", bytes as f64 / *scale as f64, unit);
        }
    }
    format!("{} B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_numbers() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_size("1KB").unwrap(), 1_000);
        assert_eq!(parse_size("8MB").unwrap(), 8_000_000);
        assert_eq!(parse_size("1g").unwrap(), 1_000_000_000);
        assert_eq!(parse_size("1T").unwrap(), 1_000_000_000_000);
    }

    #[test]
    fn test_parse_binary() {
        assert_eq!(parse_size("1KiB").unwrap(), 1_024);
        assert_eq!(parse_size("8MiB").unwrap(), 8_388_608);
        assert_eq!(parse_size("1gib").unwrap(), 1_073_741_824);
        assert_eq!(parse_size("1Ti").unwrap(), 1_099_511_627_776);
        assert_eq!(parse_size("512B").unwrap(), 512);
    }

    #[test]
    fn test_parse_fractional() {
        assert_eq!(parse_size("1.5MB").unwrap(), 1_500_000);
        assert_eq!(parse_size("2.5MiB").unwrap(), 2_621_440);
        assert_eq!(parse_size(" 1.5GiB ").unwrap(), 1_610_612_736);
    }

    #[test]
    fn test_parse_inner_whitespace() {
        assert_eq!(parse_size("8 MiB").unwrap(), 8_388_608);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("-1MB").is_err());
        assert!(parse_size("1XB").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("1.5").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KiB");
        assert_eq!(format_bytes(1_572_864), "1.50 MiB");
        assert_eq!(format_bytes(GIB), "1.00 GiB");
    }
}

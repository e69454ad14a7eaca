//! Human readable byte sizes (`4K`, `512MB`, `1g`) and their split across connections.

use crate::error_handling::types::ConfigError;

const UNITS: [&str; 4] = ["b", "kb", "mb", "gb"];

/// Parses an integer followed by an optional `B`, `K`/`KB`, `M`/`MB` or `G`/`GB` unit.
///
/// Units are case-insensitive powers of 1024. Fractions are rejected rather than rounded.
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let size = input.trim();
    if size.contains('.') {
        return Err(ConfigError::InvalidSize(format!(
            "can't parse non-integer size {:?}",
            input
        )));
    }

    let digits_end = size
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(size.len());
    if digits_end == 0 {
        return Err(ConfigError::InvalidSize(format!("invalid size {:?}", input)));
    }

    let num: u64 = size[..digits_end]
        .parse()
        .map_err(|_| ConfigError::InvalidSize(format!("size {:?} is too large", input)))?;

    let mut unit = size[digits_end..].trim().to_ascii_lowercase();
    if !unit.ends_with('b') {
        unit.push('b');
    }

    let shift = UNITS
        .iter()
        .position(|u| *u == unit)
        .ok_or_else(|| ConfigError::InvalidSize(format!("invalid unit in size {:?}", input)))?;

    num.checked_mul(1u64 << (10 * shift))
        .ok_or_else(|| ConfigError::InvalidSize(format!("size {:?} is too large", input)))
}

/// Splits `total` over `parts` as evenly as possible; the first `total % parts` shares get one
/// extra byte.
pub fn allot_size(total: u64, parts: usize) -> Vec<u64> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_u64 = parts as u64;
    let base = total / parts_u64;
    let extra = total - base * parts_u64;
    (0..parts_u64)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("512B").unwrap(), 512);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("4kb").unwrap(), 4096);
        assert_eq!(parse_size("1M").unwrap(), 1_048_576);
        assert_eq!(parse_size("512MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("2g").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(matches!(parse_size("1.5K"), Err(ConfigError::InvalidSize(_))));
        assert!(matches!(parse_size("K"), Err(ConfigError::InvalidSize(_))));
        assert!(matches!(parse_size(""), Err(ConfigError::InvalidSize(_))));
        assert!(matches!(parse_size("4T"), Err(ConfigError::InvalidSize(_))));
        assert!(matches!(parse_size("4KBB"), Err(ConfigError::InvalidSize(_))));
        assert!(matches!(
            parse_size("99999999999999999999G"),
            Err(ConfigError::InvalidSize(_))
        ));
    }

    #[test]
    fn test_allot_size_spreads_remainder_first() {
        assert_eq!(allot_size(10, 3), vec![4, 3, 3]);
        assert_eq!(allot_size(11, 3), vec![4, 4, 3]);
        assert_eq!(allot_size(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(allot_size(1_048_576, 1), vec![1_048_576]);
        assert!(allot_size(5, 0).is_empty());
        assert_eq!(allot_size(1000, 7).iter().sum::<u64>(), 1000);
    }
}

//! Version parsing and ordering for candidate payloads.

use semver::Version;

/// Parse a self-reported payload version.
///
/// Strict semver first; otherwise up to three leading numeric dot components
/// (`"3.1"` → `3.1.0`, `"3.0.8.dev"` → `3.0.8`). Anything else, including an
/// empty lookup result, is `0.0.0`.
pub fn parse_version(raw: &str) -> Version {
    let trimmed = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(trimmed) {
        return version;
    }

    let mut parts = [0u64; 3];
    for (slot, component) in parts.iter_mut().zip(trimmed.split('.')) {
        let digits: String = component
            .chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect();
        match digits.parse() {
            Ok(value) => *slot = value,
            Err(_) => break,
        }
    }
    Version::new(parts[0], parts[1], parts[2])
}

/// Stable-sort `items` by version, highest first. Ties keep their input order.
pub fn sort_by_version_desc<T>(items: Vec<(T, Version)>) -> Vec<T> {
    let mut items = items;
    items.sort_by(|a, b| b.1.cmp(&a.1));
    items.into_iter().map(|(item, _)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_semver() {
        assert_eq!(parse_version("3.0.300\n"), Version::new(3, 0, 300));
    }

    #[test]
    fn pads_short_versions() {
        assert_eq!(parse_version("3.1"), Version::new(3, 1, 0));
        assert_eq!(parse_version("v4"), Version::new(4, 0, 0));
    }

    #[test]
    fn keeps_leading_numeric_components() {
        assert_eq!(parse_version("3.0.8.dev1"), Version::new(3, 0, 8));
        assert_eq!(parse_version("3.2rc1"), Version::new(3, 2, 0));
    }

    #[test]
    fn garbage_and_empty_are_zero() {
        assert_eq!(parse_version(""), Version::new(0, 0, 0));
        assert_eq!(parse_version("development"), Version::new(0, 0, 0));
        assert_eq!(parse_version("Traceback (most recent call last)"), Version::new(0, 0, 0));
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let sorted = sort_by_version_desc(vec![
            ("a", parse_version("1.0.0")),
            ("b", parse_version("2.0.0")),
            ("c", parse_version("1.0")),
        ]);
        assert_eq!(sorted, vec!["b", "a", "c"]);
    }

    #[test]
    fn sort_order_independent_of_input_for_distinct_versions() {
        let a = ("a", parse_version("3.0.2"));
        let b = ("b", parse_version("3.0.10"));
        let forward = sort_by_version_desc(vec![a.clone(), b.clone()]);
        let reverse = sort_by_version_desc(vec![b, a]);
        assert_eq!(forward, vec!["b", "a"]);
        assert_eq!(forward, reverse);
    }
}

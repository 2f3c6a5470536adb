use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CacheError;

/// Same grammar as the original Go implementation's `(\w+) ((\d+)-(\d+)|\*)/(\d+|\*)`.
static CONTENT_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+) ((\d+)-(\d+)|\*)/(\d+|\*)").expect("static regex is valid"));

/// A parsed `Content-Range` header: `unit SP (start "-" end | "*") "/" (size | "*")`.
///
/// Each numeric field is independently `-1` when the header spelled it `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRange {
    pub unit: String,
    pub start: i64,
    pub end: i64,
    pub size: i64,
}

/// Parses a `Content-Range` header value.
///
/// Fails when the header does not match the grammar, or when all three
/// numeric fields are absent (`"* / *"` has nothing left to act on).
pub fn parse_content_range(value: &str) -> Result<ContentRange, CacheError> {
    let captures = CONTENT_RANGE_RE
        .captures(value)
        .ok_or(CacheError::ContentRange)?;

    let unit = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .ok_or(CacheError::ContentRange)?;
    let start = captures
        .get(3)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(-1);
    let end = captures
        .get(4)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(-1);
    let size = captures
        .get(5)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(-1);

    if start == -1 && end == -1 && size == -1 {
        return Err(CacheError::ContentRange);
    }

    Ok(ContentRange {
        unit,
        start,
        end,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_satisfiable_range() {
        let result = parse_content_range("bytes 0-20/30").unwrap();
        assert_eq!(
            result,
            ContentRange {
                unit: "bytes".into(),
                start: 0,
                end: 20,
                size: 30,
            }
        );
    }

    #[test]
    fn handles_range_without_size() {
        let result = parse_content_range("bytes 10-20/*").unwrap();
        assert_eq!(
            result,
            ContentRange {
                unit: "bytes".into(),
                start: 10,
                end: 20,
                size: -1,
            }
        );
    }

    #[test]
    fn handles_unsatisfiable_range() {
        let result = parse_content_range("bytes */30").unwrap();
        assert_eq!(
            result,
            ContentRange {
                unit: "bytes".into(),
                start: -1,
                end: -1,
                size: 30,
            }
        );
    }

    #[test]
    fn rejects_invalid_header() {
        assert!(matches!(
            parse_content_range("invalid"),
            Err(CacheError::ContentRange)
        ));
    }

    #[test]
    fn rejects_all_wildcard() {
        assert!(matches!(
            parse_content_range("bytes */*"),
            Err(CacheError::ContentRange)
        ));
    }
}

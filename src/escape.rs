use percent_encoding::percent_decode_str;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscapeError {
    #[error("invalid escape sequence at byte {offset} in {input:?}")]
    InvalidEscape { offset: usize, input: String },
    #[error("escaped value {input:?} is not valid UTF-8")]
    InvalidUtf8 { input: String },
}

/// Decodes a query-component escaped string: `+` becomes a space and every `%`
/// must be followed by two hex digits.
pub fn query_unescape(raw: &str) -> Result<String, EscapeError> {
    let bytes = raw.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex_at = |pos: usize| bytes.get(pos).is_some_and(|b| b.is_ascii_hexdigit());
            if !(hex_at(idx + 1) && hex_at(idx + 2)) {
                return Err(EscapeError::InvalidEscape {
                    offset: idx,
                    input: raw.to_string(),
                });
            }
            idx += 3;
        } else {
            idx += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| EscapeError::InvalidUtf8 {
            input: raw.to_string(),
        })
}

/// Identifiers interpolated into InfluxQL text must not be able to close a
/// quoted identifier or start a new statement.
pub fn is_safe_identifier(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| matches!(c, '"' | '\'' | ';' | '\\') || c.is_control())
}

pub fn quote_identifier(value: &str) -> String {
    format!("\"{value}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plus_and_percent_sequences() {
        assert_eq!(query_unescape("web+01").unwrap(), "web 01");
        assert_eq!(query_unescape("disk%3A%2Fvar").unwrap(), "disk:/var");
        assert_eq!(query_unescape("a%2Bb").unwrap(), "a+b");
        assert_eq!(query_unescape("").unwrap(), "");
    }

    #[test]
    fn rejects_truncated_or_non_hex_escapes() {
        assert!(matches!(
            query_unescape("cpu%"),
            Err(EscapeError::InvalidEscape { offset: 3, .. })
        ));
        assert!(query_unescape("cpu%4").is_err());
        assert!(query_unescape("cpu%zz").is_err());
        assert!(matches!(
            query_unescape("%ff%fe"),
            Err(EscapeError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn identifier_safety() {
        assert!(is_safe_identifier("web-01.example.com"));
        assert!(is_safe_identifier("one week"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("x\"; DROP DATABASE metrics"));
        assert!(!is_safe_identifier("it's"));
        assert!(!is_safe_identifier("a\\b"));
        assert!(!is_safe_identifier("line\nbreak"));
    }
}

//! Input validation for identifiers, callback URLs and chat text.

/// Identifier validation errors with helpful messages
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} is too long (maximum {max} bytes)")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains control characters")]
    ControlCharacters { field: &'static str },

    #[error("callback_url must be an http(s) URL with a host")]
    InvalidCallbackUrl,
}

impl ValidationError {
    /// Stable snake_case code used in JSON error bodies.
    pub fn code(&self) -> String {
        match self {
            ValidationError::Missing { field } => format!("{}_required", field),
            ValidationError::TooLong { field, .. } => format!("{}_too_long", field),
            ValidationError::ControlCharacters { field } => format!("{}_invalid", field),
            ValidationError::InvalidCallbackUrl => "invalid_callback_url".to_string(),
        }
    }
}

const MAX_ID_BYTES: usize = 128;

/// Generate safe filename from an identifier using URL encoding
pub fn safe_filename(id: &str) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    utf8_percent_encode(id, NON_ALPHANUMERIC).to_string()
}

/// Validate an avatar key, NPC id or object id: trimmed, non-empty, bounded, no control characters.
pub fn validate_id(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    if trimmed.len() > MAX_ID_BYTES {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_ID_BYTES,
        });
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters { field });
    }
    Ok(trimmed.to_string())
}

/// Validate the delivery URL supplied by an in-world object.
///
/// Only `http` and `https` are accepted and the authority must be present; region
/// servers hand out plain-http capability URLs so both schemes are allowed.
pub fn validate_callback_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or(ValidationError::InvalidCallbackUrl)?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() || host.starts_with(':') || host.contains(char::is_whitespace) {
        return Err(ValidationError::InvalidCallbackUrl);
    }
    if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::InvalidCallbackUrl);
    }
    Ok(trimmed.to_string())
}

/// Sanitize chat content: trim, drop control characters except newline/tab, enforce a byte ceiling.
pub fn sanitize_message(content: &str, max_bytes: usize) -> Result<String, ValidationError> {
    let sanitized: String = content
        .trim()
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect();
    if sanitized.is_empty() {
        return Err(ValidationError::Missing { field: "message" });
    }
    if sanitized.len() > max_bytes {
        return Err(ValidationError::TooLong {
            field: "message",
            max: max_bytes,
        });
    }
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("npc1"), "npc1");
        assert_eq!(safe_filename("Al Sayeed"), "Al%20Sayeed");
        assert_ne!(safe_filename("../etc/passwd"), "../etc/passwd");
        assert!(!safe_filename("avatar/../x").contains('/'));
    }

    #[test]
    fn test_validate_id() {
        assert_eq!(validate_id("avatar_key", "  abc-123 ").unwrap(), "abc-123");
        assert_eq!(
            validate_id("avatar_key", "   "),
            Err(ValidationError::Missing {
                field: "avatar_key"
            })
        );
        assert!(validate_id("npc_id", &"n".repeat(200)).is_err());
        assert!(validate_id("npc_id", "bad\u{0007}id").is_err());
    }

    #[test]
    fn test_callback_url_scheme() {
        assert!(validate_callback_url("http://sim123.agni.lindenlab.com:12046/cap/abc").is_ok());
        assert!(validate_callback_url("https://example.org/hook?x=1").is_ok());
        assert!(validate_callback_url("ftp://example.org/").is_err());
        assert!(validate_callback_url("http://").is_err());
        assert!(validate_callback_url("http:///path").is_err());
        assert!(validate_callback_url("javascript:alert(1)").is_err());
        assert!(validate_callback_url("http://exa mple.org/").is_err());
    }

    #[test]
    fn test_sanitize_message() {
        assert_eq!(sanitize_message(" hi there ", 100).unwrap(), "hi there");
        assert_eq!(sanitize_message("a\x00b\nc", 100).unwrap(), "ab\nc");
        assert!(sanitize_message("   ", 100).is_err());
        assert!(sanitize_message(&"a".repeat(101), 100).is_err());
        assert_eq!(
            ValidationError::Missing { field: "message" }.code(),
            "message_required"
        );
    }
}

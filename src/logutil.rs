//! Logging helpers: keep user text on a single line and keep credentials out of log files.
//!
//! Callback URLs handed to us by in-world objects are capability URLs, and the
//! delivery path appends the callback token as a query parameter, so anything
//! that might echo a URL, header or upstream error body goes through
//! [`redact_secrets`] before it is written.
use regex::Regex;
use std::sync::OnceLock;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, &'static str); 4] = [
            // token=..., callback_token=..., key=... in query strings or bodies
            (
                r"(?i)\b((?:callback_)?token|api_key|key|secret)=([^&\s|]+)",
                "$1=***",
            ),
            (r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
            (r"\bsk-[A-Za-z0-9_-]{8,}", "sk-***"),
            // Second Life capability URLs carry the capability in the path
            (r"(?i)(/cap/)[0-9a-f-]{8,}", "$1***"),
        ];
        table
            .iter()
            .filter_map(|(pat, rep)| Regex::new(pat).ok().map(|re| (re, *rep)))
            .collect()
    })
}

/// Replace credentials (query tokens, bearer headers, API keys, capability paths) with `***`.
pub fn redact_secrets(s: &str) -> String {
    let mut out = s.to_string();
    for (re, rep) in secret_patterns() {
        out = re.replace_all(&out, *rep).into_owned();
    }
    out
}

/// `escape_log` followed by `redact_secrets`; the usual choice for anything that crossed the network.
pub fn safe_log(s: &str) -> String {
    redact_secrets(&escape_log(s))
}

//! Reply post-processing for in-world delivery.
//!
//! In-world chat has a hard byte ceiling, and some viewers render typographic
//! punctuation as mojibake, so every model reply is normalised to plain ASCII
//! punctuation and then clamped to the configured byte budget.

const ELLIPSIS: &str = "...";

/// Replace curly quotes, dashes, ellipses and non-breaking spaces with ASCII equivalents.
pub fn normalize_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2012}' => out.push('-'),
            '\u{2026}' => out.push_str(ELLIPSIS),
            '\u{00A0}' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a character.
pub fn trim_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Clamp `text` to `max_bytes`.
///
/// Over-budget text is cut at the last `.`, `!` or `?` that fits; without one it is
/// hard-truncated and suffixed with `...` so the total still fits.
pub fn clamp_reply(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let trimmed = trim_to_bytes(text, max_bytes);
    if let Some(idx) = trimmed.rfind(['.', '!', '?']) {
        if idx > 0 {
            return trimmed[..=idx].to_string();
        }
    }
    if max_bytes <= ELLIPSIS.len() {
        return trim_to_bytes(text, max_bytes).to_string();
    }
    let mut out = trim_to_bytes(text, max_bytes - ELLIPSIS.len())
        .trim_end()
        .to_string();
    out.push_str(ELLIPSIS);
    out
}

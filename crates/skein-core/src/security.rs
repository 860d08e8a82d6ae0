//! Input checks at the edges of the core.

use serde_json::Value;

use skein_types::error::SkeinError;

const MAX_SESSION_KEY_LEN: usize = 256;

/// Largest tool output, in serialized bytes, kept in session history.
pub const MAX_TOOL_OUTPUT_BYTES: usize = 64 * 1024;

/// Check a conversation key before it is used as a lock or storage key.
///
/// Rejects empty and overlong keys, `..`, path separators, NUL and other
/// ASCII control characters.
pub fn validate_session_key(key: &str) -> Result<(), SkeinError> {
    let reject = |reason: String| Err(SkeinError::SecurityViolation { reason });

    if key.is_empty() {
        return reject("conversation key must not be empty".into());
    }
    if key.len() > MAX_SESSION_KEY_LEN {
        return reject(format!(
            "conversation key is {} bytes, limit is {MAX_SESSION_KEY_LEN}",
            key.len()
        ));
    }
    if key.contains("..") {
        return reject("conversation key contains '..'".into());
    }
    if key.contains(['/', '\\']) {
        return reject("conversation key contains a path separator".into());
    }
    if let Some(c) = key.chars().find(|c| c.is_ascii_control()) {
        return reject(format!(
            "conversation key contains control character U+{:04X}",
            c as u32
        ));
    }
    Ok(())
}

/// Bound a tool's output to `max_bytes` of serialized JSON.
///
/// Oversized strings keep a prefix and gain a marker. Any other oversized
/// value is replaced by an object holding a prefix of its JSON text.
pub fn truncate_output(value: Value, max_bytes: usize) -> Value {
    let serialized = value.to_string();
    let original = serialized.len();
    if original <= max_bytes {
        return value;
    }

    let marker = format!("\n[output truncated, {original} bytes total]");
    match value {
        Value::String(s) => {
            let mut keep = max_bytes.saturating_sub(marker.len() + 2);
            loop {
                let candidate = Value::String(format!("{}{marker}", prefix(&s, keep)));
                if candidate.to_string().len() <= max_bytes || keep == 0 {
                    return candidate;
                }
                // Escaping grew the text; shrink by the overshoot.
                keep = keep.saturating_sub(candidate.to_string().len() - max_bytes);
            }
        }
        _ => {
            let overhead = r#"{"truncated":true,"original_bytes":,"preview":""}"#.len()
                + original.to_string().len();
            let mut keep = max_bytes.saturating_sub(overhead);
            loop {
                let candidate = serde_json::json!({
                    "truncated": true,
                    "original_bytes": original,
                    "preview": prefix(&serialized, keep),
                });
                let len = candidate.to_string().len();
                if len <= max_bytes || keep == 0 {
                    return candidate;
                }
                keep = keep.saturating_sub(len - max_bytes);
            }
        }
    }
}

/// Longest prefix of `s` no longer than `max` bytes, cut on a char boundary.
fn prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Drop NUL, DEL and control characters other than newline, carriage
/// return and tab from inbound text.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|&c| matches!(c, '\n' | '\r' | '\t') || !c.is_control())
        .collect()
}

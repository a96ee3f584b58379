//! Model response parsing
//!
//! Providers return free-form chat text that should contain one JSON
//! object. Parsing is defensive:
//!
//! 1. `<think>…</think>` regions are stripped
//! 2. The first balanced `{…}` substring is extracted and parsed
//! 3. On parse failure a keyword scan over the raw text assembles a
//!    best-effort verdict
//! 4. Reasons are truncated at 100 characters and scrubbed of phone/email
//!    shaped substrings

use serde::Deserialize;

use super::AiVerdict;
use crate::pipeline::request::Flag;
use crate::screening::{patterns, redact};

/// Maximum characters kept of a model-provided reason.
const MAX_REASON_CHARS: usize = 100;

/// Wire shape of the model's JSON object, with lenient defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireVerdict {
    is_violation: bool,
    flags: Vec<String>,
    reason: String,
    filtered_content: Option<String>,
}

/// Parse a raw provider response into a verdict.
pub fn parse_response(raw: &str) -> AiVerdict {
    let cleaned = strip_think(raw);

    if let Some(json) = extract_json_object(&cleaned) {
        if let Ok(wire) = serde_json::from_str::<WireVerdict>(json) {
            let flags: Vec<Flag> = wire
                .flags
                .iter()
                .filter_map(|name| Flag::parse(name))
                .collect();

            return AiVerdict {
                is_violation: wire.is_violation,
                flags,
                reason: sanitize_reason(&wire.reason),
                filtered_content: wire.filtered_content,
            };
        }
    }

    keyword_fallback(&cleaned)
}

/// Remove `<think>…</think>` regions some models emit before the answer.
pub fn strip_think(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => return out, // unterminated region swallows the tail
        }
    }

    out.push_str(rest);
    out
}

/// Extract the first balanced `{…}` substring, respecting JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Truncate to 100 characters and mask phone/email shaped substrings so a
/// reason never echoes the sensitive content it describes.
pub fn sanitize_reason(reason: &str) -> String {
    let mut spans: Vec<(usize, usize)> = Vec::new();

    for pattern in patterns::PHONE_PATTERNS.iter() {
        for m in pattern.find_iter(reason) {
            spans.push((m.start(), m.end()));
        }
    }
    for m in patterns::EMAIL_PATTERN.find_iter(reason) {
        spans.push((m.start(), m.end()));
    }

    let masked = if spans.is_empty() {
        reason.to_string()
    } else {
        redact::mask_spans(reason, &spans)
    };

    if masked.chars().count() <= MAX_REASON_CHARS {
        masked
    } else {
        let truncated: String = masked.chars().take(MAX_REASON_CHARS - 1).collect();
        format!("{}…", truncated)
    }
}

/// Best-effort verdict from unstructured model output: the token
/// "violation" plus any word of the closed flag vocabulary.
fn keyword_fallback(text: &str) -> AiVerdict {
    let lowered = text.to_lowercase();

    let flags: Vec<Flag> = Flag::vocabulary()
        .iter()
        .copied()
        .filter(|flag| lowered.contains(flag.as_str()))
        .collect();

    let is_violation = lowered.contains("violation")
        && !lowered.contains("no violation")
        && !flags.is_empty();

    let reason = if is_violation {
        "Model reported a violation".to_string()
    } else {
        "Content appears acceptable".to_string()
    };

    AiVerdict {
        is_violation,
        flags: if is_violation { flags } else { Vec::new() },
        reason,
        filtered_content: None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let raw = r#"{"isViolation": true, "flags": ["phone_number"], "reason": "shares a phone number"}"#;
        let verdict = parse_response(raw);
        assert!(verdict.is_violation);
        assert_eq!(verdict.flags, vec![Flag::PhoneNumber]);
        assert_eq!(verdict.reason, "shares a phone number");
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let raw = "Sure, here is my analysis:\n{\"isViolation\": false, \"flags\": [], \"reason\": \"clean\"}\nHope that helps.";
        let verdict = parse_response(raw);
        assert!(!verdict.is_violation);
        assert!(verdict.flags.is_empty());
    }

    #[test]
    fn test_think_region_stripped() {
        let raw = "<think>the user might be sharing a number, let me check</think>{\"isViolation\": true, \"flags\": [\"phone\"], \"reason\": \"number shared\"}";
        let verdict = parse_response(raw);
        assert!(verdict.is_violation);
        assert_eq!(verdict.flags, vec![Flag::Phone]);
    }

    #[test]
    fn test_unterminated_think_region() {
        let raw = "<think>never closed {\"isViolation\": true}";
        let verdict = parse_response(raw);
        assert!(!verdict.is_violation);
    }

    #[test]
    fn test_nested_braces_extracted() {
        let text = r#"prefix {"a": {"b": 1}, "c": 2} suffix"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": {"b": 1}, "c": 2}"#));
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"{"reason": "curly } brace", "isViolation": false}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_unknown_flags_dropped() {
        let raw = r#"{"isViolation": true, "flags": ["phone_number", "telepathy"], "reason": "x"}"#;
        let verdict = parse_response(raw);
        assert_eq!(verdict.flags, vec![Flag::PhoneNumber]);
    }

    #[test]
    fn test_keyword_fallback_on_unparseable_output() {
        let raw = "This is a clear violation: the message contains a phone_number.";
        let verdict = parse_response(raw);
        assert!(verdict.is_violation);
        assert!(verdict.flags.contains(&Flag::PhoneNumber));
    }

    #[test]
    fn test_keyword_fallback_clean_output() {
        let raw = "The message looks fine to me.";
        let verdict = parse_response(raw);
        assert!(!verdict.is_violation);
        assert!(verdict.flags.is_empty());
    }

    #[test]
    fn test_reason_truncated() {
        let long = "x".repeat(300);
        let sanitized = sanitize_reason(&long);
        assert!(sanitized.chars().count() <= 100);
        assert!(sanitized.ends_with('…'));
    }

    #[test]
    fn test_reason_scrubbed_of_contact_shapes() {
        let reason = "user shared 555-123-4567 and someone@example.com";
        let sanitized = sanitize_reason(reason);
        assert!(!sanitized.contains("555-123-4567"));
        assert!(!sanitized.contains("someone@example.com"));
    }
}

//! Deterministic prompt construction
//!
//! The prompt is a pure function of (config, history, text) and is shared by
//! every provider implementation. It enumerates only the disallowed
//! categories, explicitly lists allowed ones as "do NOT flag", and pins the
//! model to a single JSON object response.

use crate::pipeline::request::FilterConfig;

/// History longer than this is compressed before prompting.
pub const HISTORY_PASS_THROUGH_LIMIT: usize = 5;

/// Select a bounded, representative subset of a long conversation.
///
/// Up to five turns pass through unchanged. Longer histories keep the first
/// turn, a turn from the middle of the first third, the middle turn and the
/// last three, in chronological order, behind a one-line summary note.
pub fn compress_history(history: &[String]) -> Vec<String> {
    if history.len() <= HISTORY_PASS_THROUGH_LIMIT {
        return history.to_vec();
    }

    let len = history.len();
    let mut indices = vec![0, len / 6, len / 2, len - 3, len - 2, len - 1];
    indices.sort_unstable();
    indices.dedup();

    let mut selected = Vec::with_capacity(indices.len() + 1);
    selected.push(format!(
        "[summarized history: {} of {} prior messages shown]",
        indices.len(),
        len
    ));
    for index in indices {
        selected.push(history[index].clone());
    }

    selected
}

/// Build the moderation prompt.
pub fn build_prompt(text: &str, history: &[String], config: &FilterConfig) -> String {
    let mut disallowed: Vec<&str> = Vec::new();
    let mut allowed: Vec<&str> = Vec::new();

    let categories: [(&str, bool); 5] = [
        ("abusive or threatening language", config.allow_abuse),
        ("phone numbers or intent to share them", config.allow_phone),
        ("email addresses or intent to share them", config.allow_email),
        (
            "physical information (street addresses, payment card numbers, card security codes)",
            config.allow_physical_information,
        ),
        (
            "social media handles, links or intent to connect",
            config.allow_social_information,
        ),
    ];

    for (label, is_allowed) in categories {
        if is_allowed {
            allowed.push(label);
        } else {
            disallowed.push(label);
        }
    }

    let mut prompt = String::with_capacity(1024 + text.len());
    prompt.push_str("You are a content moderation engine. Review the message below.\n\n");

    prompt.push_str("Flag ONLY these categories:\n");
    if disallowed.is_empty() {
        prompt.push_str("- (none; nothing is disallowed)\n");
    }
    for label in &disallowed {
        prompt.push_str("- ");
        prompt.push_str(label);
        prompt.push('\n');
    }

    if !allowed.is_empty() {
        prompt.push_str("\nThe caller explicitly permits the following; do NOT flag them:\n");
        for label in &allowed {
            prompt.push_str("- ");
            prompt.push_str(label);
            prompt.push('\n');
        }
    }

    let compressed = compress_history(history);
    if !compressed.is_empty() {
        prompt.push_str("\nConversation context (oldest first):\n");
        for turn in &compressed {
            prompt.push_str("> ");
            prompt.push_str(turn);
            prompt.push('\n');
        }
    }

    prompt.push_str("\nMessage to review:\n");
    prompt.push_str(text);
    prompt.push_str("\n\n");

    if config.return_filtered_message {
        prompt.push_str(
            "If the message violates a flagged category, also return a filteredContent field: \
             the message with each violating span replaced by asterisks.\n",
        );
    }

    prompt.push_str(
        "Respond with exactly one JSON object and nothing else: \
         {\"isViolation\": bool, \"flags\": [string], \"reason\": string, \"filteredContent\": string (optional)}. \
         Keep reason under 100 characters and never repeat sensitive content in it.",
    );

    prompt
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("turn {}", i)).collect()
    }

    #[test]
    fn test_short_history_passes_through() {
        for n in 0..=5 {
            let history = turns(n);
            assert_eq!(compress_history(&history), history);
        }
    }

    #[test]
    fn test_long_history_bounded() {
        let history = turns(12);
        let compressed = compress_history(&history);

        // Note line plus at most six selected turns.
        assert!(compressed.len() <= 7);
        assert!(compressed[0].contains("summarized history"));

        // First turn and last three survive, in order.
        assert_eq!(compressed[1], "turn 0");
        let tail: Vec<_> = compressed[compressed.len() - 3..].to_vec();
        assert_eq!(tail, vec!["turn 9", "turn 10", "turn 11"]);
    }

    #[test]
    fn test_long_history_chronological() {
        let history = turns(30);
        let compressed = compress_history(&history);
        let positions: Vec<usize> = compressed[1..]
            .iter()
            .map(|t| t.strip_prefix("turn ").unwrap().parse().unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_prompt_deterministic() {
        let config = FilterConfig::default();
        let history = turns(8);
        let a = build_prompt("check this", &history, &config);
        let b = build_prompt("check this", &history, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_prompt_lists_allowed_as_do_not_flag() {
        let config = FilterConfig {
            allow_phone: true,
            ..Default::default()
        };
        let prompt = build_prompt("text", &[], &config);
        assert!(prompt.contains("do NOT flag"));
        assert!(prompt.to_lowercase().contains("phone"));
    }

    #[test]
    fn test_prompt_varies_with_config() {
        let open = FilterConfig {
            allow_phone: true,
            ..Default::default()
        };
        let strict = FilterConfig::default();
        assert_ne!(
            build_prompt("text", &[], &open),
            build_prompt("text", &[], &strict)
        );
    }

    #[test]
    fn test_prompt_requests_redaction_only_when_asked() {
        let with = FilterConfig {
            return_filtered_message: true,
            ..Default::default()
        };
        assert!(build_prompt("t", &[], &with).contains("filteredContent field"));
        assert!(!build_prompt("t", &[], &FilterConfig::default()).contains("filteredContent field"));
    }
}

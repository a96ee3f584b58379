//! Redaction of matched spans
//!
//! Builds the `filteredContent` fallback when the AI provider did not supply
//! one: every matched span is replaced by asterisks of equal character
//! length, so surrounding text keeps its shape.

/// Merge overlapping or adjacent byte spans into a minimal sorted set.
pub fn merge_spans(mut spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    if spans.is_empty() {
        return spans;
    }

    spans.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());

    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    merged
}

/// Replace each matched span with asterisks of equal character length.
///
/// Spans are byte offsets into `text` and must lie on character boundaries,
/// which regex match offsets always do. Out-of-range spans are ignored.
pub fn mask_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let spans = merge_spans(spans.to_vec());
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for (start, end) in spans {
        if start >= end || end > text.len() || start < cursor {
            continue;
        }
        if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            continue;
        }

        out.push_str(&text[cursor..start]);
        let masked_chars = text[start..end].chars().count();
        out.extend(std::iter::repeat('*').take(masked_chars));
        cursor = end;
    }

    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_single_span() {
        let text = "Call me at 555-123-4567";
        let masked = mask_spans(text, &[(11, 23)]);
        assert_eq!(masked, "Call me at ************");
    }

    #[test]
    fn test_mask_preserves_length_in_chars() {
        let text = "send to someone@example.com now";
        let masked = mask_spans(text, &[(8, 27)]);
        assert_eq!(masked.chars().count(), text.chars().count());
        assert!(!masked.contains("someone"));
    }

    #[test]
    fn test_merge_overlapping_spans() {
        let merged = merge_spans(vec![(5, 10), (8, 14), (20, 25)]);
        assert_eq!(merged, vec![(5, 14), (20, 25)]);
    }

    #[test]
    fn test_mask_multiple_spans() {
        let text = "a@b.com and 555-123-4567";
        let masked = mask_spans(text, &[(0, 7), (12, 24)]);
        assert_eq!(masked, "******* and ************");
    }

    #[test]
    fn test_out_of_range_span_ignored() {
        let text = "short";
        assert_eq!(mask_spans(text, &[(2, 400)]), "short");
    }

    #[test]
    fn test_empty_spans_noop() {
        assert_eq!(mask_spans("unchanged", &[]), "unchanged");
    }
}

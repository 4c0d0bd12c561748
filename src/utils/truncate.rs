//! Truncation Utilities
//!
//! Bounded text for logs and user-facing diagnostics. All cuts respect
//! UTF-8 boundaries.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// Keep at most this many bytes, split between prefix and suffix
    Bytes(usize),
    /// Keep at most this many characters of the head
    Chars(usize),
}

/// Truncate `content` according to `policy`.
///
/// `Bytes` keeps both ends of the text (errors tend to carry the useful part
/// at the tail), `Chars` keeps only the head.
pub fn truncate_text(content: &str, policy: TruncationPolicy) -> String {
    match policy {
        TruncationPolicy::Bytes(max_bytes) => truncate_middle(content, max_bytes),
        TruncationPolicy::Chars(max_chars) => truncate_head(content, max_chars),
    }
}

fn truncate_middle(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }

    if max_bytes == 0 {
        return format!("... [{} chars truncated] ...", content.len());
    }

    let half = max_bytes / 2;
    let mut prefix_end = 0;
    let mut suffix_start = content.len();

    for (idx, c) in content.char_indices() {
        let char_end = idx + c.len_utf8();
        if char_end <= half {
            prefix_end = char_end;
        } else {
            break;
        }
    }

    let suffix_target = content.len().saturating_sub(half);
    for (idx, _) in content.char_indices().rev() {
        if idx >= suffix_target {
            suffix_start = idx;
        } else {
            break;
        }
    }

    if suffix_start < prefix_end {
        suffix_start = prefix_end;
    }

    let prefix = &content[..prefix_end];
    let suffix = &content[suffix_start..];
    let truncated_count = content.len() - (prefix.len() + suffix.len());

    format!("{} ... [{} chars truncated] ... {}", prefix, truncated_count, suffix)
}

fn truncate_head(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Single-line preview of a code snippet for log records.
///
/// Whitespace runs collapse to one space before the head is cut.
pub fn preview(code: &str, limit: usize) -> String {
    let compact = code.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_text(&compact, TruncationPolicy::Chars(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate_text("hello", TruncationPolicy::Bytes(10)), "hello");
        assert_eq!(truncate_text("hello", TruncationPolicy::Chars(10)), "hello");
    }

    #[test]
    fn test_middle_truncation_keeps_both_ends() {
        let text = format!("{}{}", "a".repeat(100), "z".repeat(100));
        let out = truncate_text(&text, TruncationPolicy::Bytes(20));
        assert!(out.starts_with("aaaaaaaaaa"));
        assert!(out.ends_with("zzzzzzzzzz"));
        assert!(out.contains("[180 chars truncated]"));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "é".repeat(50);
        let out = truncate_text(&text, TruncationPolicy::Bytes(9));
        assert!(out.contains("truncated"));
        let head = truncate_text(&text, TruncationPolicy::Chars(3));
        assert_eq!(head, "ééé...");
    }

    #[test]
    fn test_preview_collapses_whitespace() {
        let code = "fig = px.bar(df,\n    x='team',\n    y='wins')\n";
        assert_eq!(preview(code, 240), "fig = px.bar(df, x='team', y='wins')");
        assert_eq!(preview(code, 3), "fig...");
        assert_eq!(preview("", 10), "");
    }
}

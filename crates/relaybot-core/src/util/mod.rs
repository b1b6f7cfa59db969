pub mod http;

/// Truncate a string to max length, adding suffix if truncated.
pub fn truncate_string(s: &str, max_len: usize, suffix: &str) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(suffix.len());
    // Ensure we don't split a multi-byte UTF-8 character
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10, "..."), "hello");
        assert_eq!(truncate_string("hello world", 8, "..."), "hello...");
        assert_eq!(truncate_string("ab", 2, "..."), "ab");
    }

    #[test]
    fn test_truncate_string_multibyte() {
        // Each CJK char is 3 bytes; the cut must land on a char boundary
        let out = truncate_string("歡迎加入群組", 8, "…");
        assert!(out.ends_with('…'));
        assert!(out.starts_with("歡"));
    }
}

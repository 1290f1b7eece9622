pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

pub fn excerpt(value: &str, max_bytes: usize) -> String {
    let trimmed = value.trim();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    format!("{}...", truncate_utf8_prefix(trimmed, max_bytes))
}

pub fn first_line(value: &str) -> &str {
    value.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::{excerpt, first_line, truncate_utf8_prefix};

    #[test]
    fn truncate_utf8_prefix_handles_ascii() {
        assert_eq!(truncate_utf8_prefix("hello", 3), "hel");
    }

    #[test]
    fn truncate_utf8_prefix_does_not_split_utf8() {
        assert_eq!(truncate_utf8_prefix("a😀b", 2), "a");
        assert_eq!(truncate_utf8_prefix("a😀b", 5), "a😀");
    }

    #[test]
    fn excerpt_trims_and_marks_truncation() {
        assert_eq!(excerpt("  plain  ", 50), "plain");
        assert_eq!(excerpt("0123456789", 4), "0123...");
    }

    #[test]
    fn first_line_takes_head_of_multiline() {
        assert_eq!(first_line("alpha\nbeta\n"), "alpha");
        assert_eq!(first_line(""), "");
    }
}

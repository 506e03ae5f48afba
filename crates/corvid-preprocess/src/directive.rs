//! `GET "path"` directive recognition (§6 "Include directive").
//!
//! The keyword is matched case-insensitively (`GET`, `get`, `Get`, ...);
//! the path is always a double-quoted string, same-line.

/// If `line` (with leading/trailing whitespace already irrelevant) opens
/// with a `GET` directive, return the quoted path's contents. Returns
/// `None` for any other line, including one that merely mentions `GET`
/// somewhere other than as the line's leading directive.
pub fn parse_get_directive(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let rest = strip_case_insensitive_prefix(trimmed, "get")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    let after_open_quote = rest.strip_prefix('"')?;
    let end = after_open_quote.find('"')?;
    Some(&after_open_quote[..end])
}

fn strip_case_insensitive_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() < prefix.len() {
        return None;
    }
    let (head, tail) = s.split_at(prefix.len());
    if head.eq_ignore_ascii_case(prefix) {
        Some(tail)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_uppercase_get() {
        assert_eq!(parse_get_directive(r#"GET "foo.b""#), Some("foo.b"));
    }

    #[test]
    fn recognizes_lowercase_get() {
        assert_eq!(parse_get_directive(r#"get "foo.b""#), Some("foo.b"));
    }

    #[test]
    fn recognizes_mixed_case_get() {
        assert_eq!(parse_get_directive(r#"GeT "foo.b""#), Some("foo.b"));
    }

    #[test]
    fn allows_leading_whitespace() {
        assert_eq!(parse_get_directive(r#"   GET "foo.b""#), Some("foo.b"));
    }

    #[test]
    fn requires_whitespace_after_keyword() {
        assert_eq!(parse_get_directive(r#"GETxyz "foo.b""#), None);
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(parse_get_directive("LET x = 1"), None);
        assert_eq!(parse_get_directive(""), None);
    }

    #[test]
    fn absolute_path_is_returned_verbatim() {
        assert_eq!(
            parse_get_directive(r#"GET "/usr/include/foo.h""#),
            Some("/usr/include/foo.h")
        );
    }
}

// ABOUTME: Identifier and string-literal quoting shared by every dialect
// ABOUTME: Escapes embedded delimiters by doubling, or by backslash for Hive

/// Wrap an identifier in `open`/`close`, doubling any embedded `close`.
///
/// # Examples
///
/// ```
/// use table_sync::dialect::quote::quote_with;
/// assert_eq!(quote_with("users", '"', '"'), "\"users\"");
/// assert_eq!(quote_with("we\"ird", '"', '"'), "\"we\"\"ird\"");
/// assert_eq!(quote_with("a]b", '[', ']'), "[a]]b]");
/// assert_eq!(quote_with("a`b", '`', '`'), "`a``b`");
/// ```
pub fn quote_with(identifier: &str, open: char, close: char) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push(open);
    for ch in identifier.chars() {
        if ch == close {
            quoted.push(close);
        }
        quoted.push(ch);
    }
    quoted.push(close);
    quoted
}

/// Standard SQL string literal: single quotes, embedded quotes doubled.
///
/// # Examples
///
/// ```
/// use table_sync::dialect::quote::quote_literal;
/// assert_eq!(quote_literal("hello"), "'hello'");
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// assert_eq!(quote_literal(""), "''");
/// ```
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push('\'');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Hive string literal: backslash escapes instead of doubled quotes.
///
/// # Examples
///
/// ```
/// use table_sync::dialect::quote::quote_hive_literal;
/// assert_eq!(quote_hive_literal("it's"), "'it\\'s'");
/// assert_eq!(quote_hive_literal("C:\\tmp"), "'C:\\\\tmp'");
/// ```
pub fn quote_hive_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}

/// Strip control characters and cap the length of a name before it is logged.
///
/// For display only; SQL safety comes from quoting.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

//! RFC 1459 case folding.
//!
//! Nicknames and channel names compare case-insensitively, and the
//! rfc1459 mapping additionally treats `[]\~` as the uppercase forms of
//! `{}|^`. Every comparison in the runtime goes through this module so
//! channel membership and permission masks agree on what "the same name"
//! means.

/// Fold one character to its rfc1459 lowercase form.
#[inline]
pub const fn fold_char(c: char) -> char {
    match c {
        'A'..='Z' => c.to_ascii_lowercase(),
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c,
    }
}

/// Fold a whole string; the result is suitable as a map key.
pub fn fold(s: &str) -> String {
    s.chars().map(fold_char).collect()
}

/// Case-insensitive equality under the rfc1459 mapping.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().map(fold_char).eq(b.chars().map(fold_char))
}

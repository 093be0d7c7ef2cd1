//! Outgoing text helpers: UTF-8-safe truncation and splitting.

/// Longest prefix of `s` that fits in `max_bytes` without cutting a
/// multi-byte character.
#[inline]
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split a message body into chunks of at most `max_bytes` bytes.
///
/// A chunk ends at the last space that fits when there is one, so words
/// survive intact; the separating space is dropped. Text without a usable
/// space is cut at the nearest character boundary.
///
/// ```
/// use slircbot_proto::text::split_text;
///
/// let parts: Vec<_> = split_text("hello brave new world", 11).collect();
/// assert_eq!(parts, vec!["hello brave", "new world"]);
/// ```
pub fn split_text(s: &str, max_bytes: usize) -> impl Iterator<Item = &str> {
    SplitText {
        remaining: s,
        max_bytes: max_bytes.max(4),
    }
}

struct SplitText<'a> {
    remaining: &'a str,
    max_bytes: usize,
}

impl<'a> Iterator for SplitText<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        if self.remaining.len() <= self.max_bytes {
            return Some(std::mem::take(&mut self.remaining));
        }

        let window = truncate_utf8_safe(self.remaining, self.max_bytes);
        if self.remaining.as_bytes().get(window.len()) == Some(&b' ') {
            self.remaining = &self.remaining[window.len() + 1..];
            return Some(window);
        }
        match window.rfind(' ').filter(|&pos| pos > 0) {
            Some(pos) => {
                let chunk = &self.remaining[..pos];
                self.remaining = &self.remaining[pos + 1..];
                Some(chunk)
            }
            None => {
                self.remaining = &self.remaining[window.len()..];
                Some(window)
            }
        }
    }
}

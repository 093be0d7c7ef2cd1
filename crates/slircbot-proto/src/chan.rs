//! Channel names and membership role markers.
//!
//! Servers decorate channel targets and NAMES entries with role markers:
//! `@#ops` addresses only the operators of `#ops`, and `@alice` in a names
//! list means alice holds operator status. The stripping policy is:
//!
//! * a *target* keeps its leading markers unless removing them leaves a
//!   `#`-channel, so `@#ops` becomes `#ops` while `&local` is untouched
//!   (`&` is both a marker and a channel sigil);
//! * a *member* entry loses every leading marker.

/// Role markers, highest first.
pub const ROLE_MARKERS: &[char] = &['~', '&', '@', '%', '+'];

/// Channel sigils recognised as channel names.
pub const CHANNEL_SIGILS: &[char] = &['#', '&'];

/// Whether `name` addresses a channel rather than a user.
pub fn is_channel(name: &str) -> bool {
    name.starts_with(CHANNEL_SIGILS) && name.len() > 1
}

/// Remove role markers from a message target if what remains is a `#` channel.
pub fn strip_status_prefix(target: &str) -> &str {
    let stripped = target.trim_start_matches(ROLE_MARKERS);
    if stripped.len() != target.len() && stripped.starts_with('#') {
        stripped
    } else {
        target
    }
}

/// Remove every leading role marker from a NAMES entry.
pub fn strip_member_prefix(entry: &str) -> &str {
    entry.trim_start_matches(ROLE_MARKERS)
}

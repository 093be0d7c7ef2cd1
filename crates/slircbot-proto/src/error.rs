//! Error types for wire-level parsing.

use thiserror::Error;

/// Convenience alias for results carrying a [`ParseError`].
pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// Reasons a received line could not be turned into a [`Frame`](crate::Frame).
///
/// The runtime never treats these as fatal: a line that fails to parse is
/// routed to the "unhandled" event with the raw text attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line was empty (or only whitespace / tags).
    #[error("empty line")]
    Empty,

    /// A `:` prefix was present but nothing followed it.
    #[error("empty prefix")]
    EmptyPrefix,

    /// The command token was neither letters nor a three digit numeric.
    #[error("invalid command token: {0:?}")]
    InvalidCommand(String),

    /// Characters remained after the parameter list was consumed.
    #[error("unexpected trailing input at byte {0}")]
    TrailingInput(usize),
}

impl ParseError {
    /// Static label used in structured log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::EmptyPrefix => "empty_prefix",
            Self::InvalidCommand(_) => "invalid_command",
            Self::TrailingInput(_) => "trailing_input",
        }
    }
}

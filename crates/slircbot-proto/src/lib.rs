//! # slircbot-proto
//!
//! Wire-level building blocks for the slircbot runtime: parsing and
//! serializing protocol lines, source prefixes and identities, wildcard
//! identity masks, CTCP bodies, RFC 1459 case mapping and receive-side
//! line framing.
//!
//! Nothing here performs I/O.
//!
//! ```rust
//! use slircbot_proto::Frame;
//!
//! let frame = Frame::parse(":alice!a@example.org PRIVMSG #rust :hi all").unwrap();
//! assert_eq!(frame.command, "PRIVMSG");
//! assert_eq!(frame.source().unwrap().nickname, "alice");
//! assert_eq!(Frame::pong("abc123").to_string(), "PONG :abc123");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod chan;
pub mod ctcp;
pub mod error;
pub mod frame;
pub mod identity;
pub mod line;
pub mod mask;
pub mod numeric;
pub mod text;

pub use self::ctcp::{Ctcp, CtcpKind};
pub use self::error::ParseError;
pub use self::frame::Frame;
pub use self::identity::{Identity, Prefix};
pub use self::line::LineBuffer;
pub use self::mask::Mask;
pub use self::numeric::Numeric;

//! Network layer.
//!
//! [`socket`] moves bytes and enforces flood control; [`connection`]
//! turns lines into events and drives the reconnect/keepalive lifecycle.

pub mod connection;
pub mod socket;

pub use connection::{Connection, ConnectionState, Role};
pub use socket::Socket;

//! # Transport Layer
//!
//! Owns the TCP connection to the server's admin port.
//!
//! The transport reads exactly one length-prefixed frame at a time and writes
//! complete frames. It tells a graceful peer close
//! ([`ProtocolError::ConnectionClosed`](crate::error::ProtocolError::ConnectionClosed))
//! apart from a timeout, since the session treats the former as terminal and
//! simply retries the latter.

pub mod tcp;

pub use tcp::TcpTransport;

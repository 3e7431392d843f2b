//! # Core Protocol Components
//!
//! Low-level packet handling: field encodings, packet schemas and framing.
//!
//! ## Components
//! - **Wire**: primitive field types and the dynamic [`wire::Value`]
//! - **Schema**: ordered field descriptors and the generic encode/decode walker
//! - **Packet**: every packet kind, grouped in `AdminPacket` and `ServerPacket`
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Size(2, LE)] [Tag(1)] [Payload(Size - 3)]
//! ```
//!
//! Integers are little-endian, strings are null-terminated UTF-8 and dates are
//! day numbers counted from year 0.

pub mod codec;
pub mod packet;
pub mod schema;
pub mod wire;

//! # Packets
//!
//! Every packet kind of the admin protocol, in both directions.
//!
//! Each kind is a plain struct whose fields are `Option`s: a field that was
//! never set is skipped on encode, and a field that failed to decode (lenient
//! mode) stays `None`. The kinds of one direction are gathered in a sum type,
//! [`AdminPacket`] for admin → server and [`ServerPacket`] for server → admin.
//! Both sum types carry an `Unknown` variant holding the raw payload of any tag
//! this crate does not know, so newer servers never break decoding.
//!
//! ## Wire Format
//! ```text
//! [Size(2, LE, includes itself and the tag)] [Tag(1)] [Payload(Size - 3)]
//! ```
//!
//! Schemas are declared once with `define_packets!`, which generates the
//! struct, its field list and the tag → constructor table used by `decode`.

use crate::core::schema::{decode_fields, encode_fields, FieldDescriptor, FieldKind};
use crate::core::wire::WireType;
use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::warn;

/// Bytes of the size prefix
pub const SIZE_PREFIX_LEN: usize = 2;

/// Size prefix plus type tag
pub const FRAME_HEADER_LEN: usize = 3;

/// Documented ceiling for a single frame. Larger frames are logged, not refused.
pub const MAX_PACKET_SIZE: usize = 1460;

// Shorthands used by the schema declarations
pub(crate) const U8: FieldKind = FieldKind::Wire(WireType::U8);
pub(crate) const U16: FieldKind = FieldKind::Wire(WireType::U16);
pub(crate) const U32: FieldKind = FieldKind::Wire(WireType::U32);
pub(crate) const U64: FieldKind = FieldKind::Wire(WireType::U64);
pub(crate) const I64: FieldKind = FieldKind::Wire(WireType::I64);
pub(crate) const BOOL: FieldKind = FieldKind::Wire(WireType::Bool);
pub(crate) const STR: FieldKind = FieldKind::Wire(WireType::Str);
pub(crate) const DATE: FieldKind = FieldKind::Wire(WireType::Date);

macro_rules! packet_types {
    ($($variant:ident = $tag:literal => $label:literal,)*) => {
        /// Tag of every packet kind known to this crate.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum PacketType {
            $($variant = $tag,)*
            /// Any tag not listed above
            Unknown = 0xFF,
        }

        impl PacketType {
            /// Look up a kind by tag. `None` for unknown tags.
            pub fn from_tag(tag: u8) -> Option<Self> {
                match tag {
                    $($tag => Some(PacketType::$variant),)*
                    _ => None,
                }
            }

            pub const fn tag(self) -> u8 {
                self as u8
            }

            /// Protocol name, as used in log lines
            pub const fn name(self) -> &'static str {
                match self {
                    $(PacketType::$variant => $label,)*
                    PacketType::Unknown => "UNKNOWN_PACKET",
                }
            }
        }
    };
}

packet_types! {
    AdminJoin = 0 => "ADMIN_PACKET_ADMIN_JOIN",
    AdminQuit = 1 => "ADMIN_PACKET_ADMIN_QUIT",
    AdminUpdateFrequency = 2 => "ADMIN_PACKET_ADMIN_UPDATE_FREQUENCY",
    AdminPoll = 3 => "ADMIN_PACKET_ADMIN_POLL",
    AdminChat = 4 => "ADMIN_PACKET_ADMIN_CHAT",
    AdminRcon = 5 => "ADMIN_PACKET_ADMIN_RCON",
    AdminGamescript = 6 => "ADMIN_PACKET_ADMIN_GAMESCRIPT",
    AdminPing = 7 => "ADMIN_PACKET_ADMIN_PING",

    ServerFull = 100 => "ADMIN_PACKET_SERVER_FULL",
    ServerBanned = 101 => "ADMIN_PACKET_SERVER_BANNED",
    ServerError = 102 => "ADMIN_PACKET_SERVER_ERROR",
    ServerProtocol = 103 => "ADMIN_PACKET_SERVER_PROTOCOL",
    ServerWelcome = 104 => "ADMIN_PACKET_SERVER_WELCOME",
    ServerNewGame = 105 => "ADMIN_PACKET_SERVER_NEWGAME",
    ServerShutdown = 106 => "ADMIN_PACKET_SERVER_SHUTDOWN",
    ServerDate = 107 => "ADMIN_PACKET_SERVER_DATE",
    ServerClientJoin = 108 => "ADMIN_PACKET_SERVER_CLIENT_JOIN",
    ServerClientInfo = 109 => "ADMIN_PACKET_SERVER_CLIENT_INFO",
    ServerClientUpdate = 110 => "ADMIN_PACKET_SERVER_CLIENT_UPDATE",
    ServerClientQuit = 111 => "ADMIN_PACKET_SERVER_CLIENT_QUIT",
    ServerClientError = 112 => "ADMIN_PACKET_SERVER_CLIENT_ERROR",
    ServerCompanyNew = 113 => "ADMIN_PACKET_SERVER_COMPANY_NEW",
    ServerCompanyInfo = 114 => "ADMIN_PACKET_SERVER_COMPANY_INFO",
    ServerCompanyUpdate = 115 => "ADMIN_PACKET_SERVER_COMPANY_UPDATE",
    ServerCompanyRemove = 116 => "ADMIN_PACKET_SERVER_COMPANY_REMOVE",
    ServerCompanyEconomy = 117 => "ADMIN_PACKET_SERVER_COMPANY_ECONOMY",
    ServerCompanyStats = 118 => "ADMIN_PACKET_SERVER_COMPANY_STATS",
    ServerChat = 119 => "ADMIN_PACKET_SERVER_CHAT",
    ServerRcon = 120 => "ADMIN_PACKET_SERVER_RCON",
    ServerConsole = 121 => "ADMIN_PACKET_SERVER_CONSOLE",
    ServerCmdNames = 122 => "ADMIN_PACKET_SERVER_CMD_NAMES",
    ServerCmdLogging = 123 => "ADMIN_PACKET_SERVER_CMD_LOGGING",
    ServerGamescript = 124 => "ADMIN_PACKET_SERVER_GAMESCRIPT",
    ServerRconEnd = 125 => "ADMIN_PACKET_SERVER_RCON_END",
    ServerPong = 126 => "ADMIN_PACKET_SERVER_PONG",
}

impl PacketType {
    /// Whether this kind travels server → admin
    pub const fn is_inbound(self) -> bool {
        let tag = self as u8;
        tag >= 100 && tag != 0xFF
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A packet whose tag is not in the dispatch table. The payload is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPacket {
    pub tag: u8,
    pub payload: Bytes,
}

/// Split a complete frame into its tag and payload.
///
/// The size prefix must match the frame length exactly.
pub fn split_frame(frame: &[u8]) -> Result<(u8, &[u8])> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::InvalidFrameLength(frame.len() as u16));
    }
    let size = u16::from_le_bytes([frame[0], frame[1]]);
    if usize::from(size) != frame.len() {
        return Err(ProtocolError::InvalidFrameLength(size));
    }
    Ok((frame[SIZE_PREFIX_LEN], &frame[FRAME_HEADER_LEN..]))
}

/// Frame an already-encoded payload
pub fn build_frame(tag: u8, payload: &[u8]) -> Result<Bytes> {
    let mut buf = frame_buffer(tag, payload.len());
    buf.put_slice(payload);
    finish_frame(buf)
}

fn frame_buffer(tag: u8, payload_hint: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload_hint);
    // size is patched in by finish_frame
    buf.put_u16_le(0);
    buf.put_u8(tag);
    buf
}

fn finish_frame(mut buf: BytesMut) -> Result<Bytes> {
    let size = buf.len();
    let prefix = u16::try_from(size).map_err(|_| ProtocolError::PacketTooLarge(size))?;
    if size > MAX_PACKET_SIZE {
        warn!(size, max = MAX_PACKET_SIZE, "Frame exceeds documented maximum packet size");
    }
    buf[..SIZE_PREFIX_LEN].copy_from_slice(&prefix.to_le_bytes());
    Ok(buf.freeze())
}

/// Encode a schema-described packet into a complete frame.
pub(crate) fn encode_frame(
    packet_type: PacketType,
    fields: &[FieldDescriptor],
    values: &[Option<crate::core::wire::Value>],
    strict: bool,
) -> Result<Bytes> {
    let mut buf = frame_buffer(packet_type.tag(), 32);
    encode_fields(packet_type.name(), fields, values, &mut buf, strict)?;
    finish_frame(buf)
}

/// Decode a payload against a schema.
pub(crate) fn decode_payload(
    packet_type: PacketType,
    fields: &[FieldDescriptor],
    payload: &[u8],
    strict: bool,
) -> Result<Vec<Option<crate::core::wire::Value>>> {
    decode_fields(packet_type.name(), fields, payload, strict)
}

/// Declare the packet kinds of one direction.
///
/// ```text
/// define_packets! {
///     pub enum AdminPacket {
///         Join(AdminJoin) { password: String => STR, ... },
///     }
/// }
/// ```
///
/// The struct name doubles as the [`PacketType`] variant.
macro_rules! define_packets {
    (
        $(#[$enum_meta:meta])*
        pub enum $enum_name:ident {
            $(
                $(#[$meta:meta])*
                $variant:ident($kind:ident) {
                    $($field:ident : $ty:ty => $desc:expr),* $(,)?
                }
            ),* $(,)?
        }
    ) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq, Eq)]
            pub struct $kind {
                $(pub $field: Option<$ty>,)*
            }

            impl $kind {
                pub const PACKET_TYPE: $crate::core::packet::PacketType =
                    $crate::core::packet::PacketType::$kind;

                /// Field schema, in wire order
                pub const FIELDS: &'static [$crate::core::schema::FieldDescriptor] = &[
                    $($crate::core::schema::FieldDescriptor {
                        name: stringify!($field),
                        kind: $desc,
                    },)*
                ];

                /// Field values parallel to [`Self::FIELDS`]
                pub fn to_values(&self) -> Vec<Option<$crate::core::wire::Value>> {
                    vec![$(self.$field.clone().map($crate::core::wire::Value::from)),*]
                }

                /// Build the packet from decoded field values
                #[allow(unused_mut, unused_variables)]
                pub fn from_values(
                    values: Vec<Option<$crate::core::wire::Value>>,
                ) -> $crate::error::Result<Self> {
                    let mut values = values.into_iter();
                    Ok(Self {
                        $($field: match values.next().flatten() {
                            Some(value) => Some(
                                <$ty as $crate::core::wire::FromValue>::from_value(value)
                                    .map_err(|source| $crate::error::ProtocolError::PacketDecode {
                                        packet: Self::PACKET_TYPE.name(),
                                        field: stringify!($field),
                                        source,
                                    })?,
                            ),
                            None => None,
                        },)*
                    })
                }
            }

            impl From<$kind> for $enum_name {
                fn from(packet: $kind) -> Self {
                    $enum_name::$variant(packet)
                }
            }
        )*

        $(#[$enum_meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum $enum_name {
            $($variant($kind),)*
            Unknown($crate::core::packet::UnknownPacket),
        }

        impl $enum_name {
            /// Kind of this packet, `PacketType::Unknown` for unknown tags
            pub fn packet_type(&self) -> $crate::core::packet::PacketType {
                match self {
                    $($enum_name::$variant(_) => $crate::core::packet::PacketType::$kind,)*
                    $enum_name::Unknown(_) => $crate::core::packet::PacketType::Unknown,
                }
            }

            /// Tag as it appears on the wire
            pub fn tag(&self) -> u8 {
                match self {
                    $enum_name::Unknown(packet) => packet.tag,
                    other => other.packet_type().tag(),
                }
            }

            pub fn name(&self) -> &'static str {
                self.packet_type().name()
            }

            /// Encode into a complete frame, size prefix included.
            ///
            /// With `strict` unset a field that fails to encode is logged and
            /// the frame is cut short at that field.
            pub fn encode(&self, strict: bool) -> $crate::error::Result<bytes::Bytes> {
                match self {
                    $($enum_name::$variant(packet) => $crate::core::packet::encode_frame(
                        $kind::PACKET_TYPE,
                        $kind::FIELDS,
                        &packet.to_values(),
                        strict,
                    ),)*
                    $enum_name::Unknown(packet) => {
                        $crate::core::packet::build_frame(packet.tag, &packet.payload)
                    }
                }
            }

            /// Decode a complete frame, size prefix included.
            ///
            /// Unknown tags are never an error. With `strict` unset a field that
            /// fails to decode is logged and the packet is returned with that
            /// field and all later ones unset.
            pub fn decode(frame: &[u8], strict: bool) -> $crate::error::Result<Self> {
                let (tag, payload) = $crate::core::packet::split_frame(frame)?;
                match $crate::core::packet::PacketType::from_tag(tag) {
                    $(Some($crate::core::packet::PacketType::$kind) => {
                        let values = $crate::core::packet::decode_payload(
                            $kind::PACKET_TYPE,
                            $kind::FIELDS,
                            payload,
                            strict,
                        )?;
                        Ok($enum_name::$variant($kind::from_values(values)?))
                    })*
                    _ => Ok($enum_name::Unknown($crate::core::packet::UnknownPacket {
                        tag,
                        payload: bytes::Bytes::copy_from_slice(payload),
                    })),
                }
            }
        }
    };
}

mod admin;
mod server;

pub use admin::*;
pub use server::*;

//! # Packet Schemas
//!
//! A packet kind is described by an ordered list of [`FieldDescriptor`]s. The
//! same list drives both directions:
//!
//! - [`encode_fields`] walks the list, skips fields that were never set, and
//!   appends every present value to the payload.
//! - [`decode_fields`] walks the list with a cursor into the payload. Primitive
//!   fields advance the cursor by their consumed size, custom fields run their
//!   own routine (variable-length tails, repeated records).
//!
//! Both walkers take a strictness flag. Strict mode turns the first field
//! failure into an error; lenient mode logs it and stops, leaving the packet
//! truncated (encode) or partially populated (decode).

use crate::core::wire::{Value, WireType};
use crate::error::{constants, FieldError, ProtocolError, Result};
use bytes::BytesMut;
use std::fmt;
use tracing::warn;

/// Custom decode routine. Reads at `*cursor` and advances it.
pub type DecodeFn = fn(&[u8], &mut usize) -> std::result::Result<Value, FieldError>;

/// Custom encode routine for the matching [`DecodeFn`].
pub type EncodeFn = fn(&Value, &mut BytesMut) -> std::result::Result<(), FieldError>;

/// How one field is represented on the wire.
#[derive(Clone, Copy)]
pub enum FieldKind {
    Wire(WireType),
    Custom {
        name: &'static str,
        decode: DecodeFn,
        encode: EncodeFn,
    },
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Wire(ty) => f.debug_tuple("Wire").field(ty).finish(),
            FieldKind::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
        }
    }
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Wire(ty) => ty.name(),
            FieldKind::Custom { name, .. } => name,
        }
    }
}

/// One entry of a packet schema. Declaration order is wire order.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn wire(name: &'static str, ty: WireType) -> Self {
        Self {
            name,
            kind: FieldKind::Wire(ty),
        }
    }

    pub const fn custom(
        name: &'static str,
        routine: &'static str,
        decode: DecodeFn,
        encode: EncodeFn,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Custom {
                name: routine,
                decode,
                encode,
            },
        }
    }

    fn encode(&self, value: &Value, out: &mut BytesMut) -> std::result::Result<(), FieldError> {
        match self.kind {
            FieldKind::Wire(ty) => ty.encode(value, out),
            FieldKind::Custom { encode, .. } => encode(value, out),
        }
    }

    fn decode(&self, buf: &[u8], cursor: &mut usize) -> std::result::Result<Value, FieldError> {
        match self.kind {
            FieldKind::Wire(ty) => {
                let (value, size) = ty.decode(buf, *cursor)?;
                *cursor += size;
                Ok(value)
            }
            FieldKind::Custom { decode, .. } => decode(buf, cursor),
        }
    }
}

/// Encode the present values of a packet into `out`.
///
/// `values` is parallel to `fields`; `None` marks a field that was never set
/// and is skipped entirely. A field that fails to encode leaves no bytes
/// behind. In lenient mode the walk stops there and the truncated payload is
/// kept.
pub fn encode_fields(
    packet: &'static str,
    fields: &[FieldDescriptor],
    values: &[Option<Value>],
    out: &mut BytesMut,
    strict: bool,
) -> Result<()> {
    for (field, value) in fields.iter().zip(values) {
        let Some(value) = value else {
            continue;
        };
        let mark = out.len();
        if let Err(source) = field.encode(value, out) {
            out.truncate(mark);
            if strict {
                return Err(ProtocolError::PacketEncode {
                    packet,
                    field: field.name,
                    source,
                });
            }
            warn!(
                packet,
                field = field.name,
                error = %source,
                "{}", constants::ERR_FIELD_ENCODE
            );
            break;
        }
    }
    Ok(())
}

/// Decode a payload against a schema.
///
/// Returns one slot per field. In lenient mode a failing field and every field
/// after it stay `None`.
pub fn decode_fields(
    packet: &'static str,
    fields: &[FieldDescriptor],
    payload: &[u8],
    strict: bool,
) -> Result<Vec<Option<Value>>> {
    let mut values = vec![None; fields.len()];
    let mut cursor = 0usize;

    for (slot, field) in values.iter_mut().zip(fields) {
        match field.decode(payload, &mut cursor) {
            Ok(value) => *slot = Some(value),
            Err(source) if strict => {
                return Err(ProtocolError::PacketDecode {
                    packet,
                    field: field.name,
                    source,
                });
            }
            Err(source) => {
                warn!(
                    packet,
                    field = field.name,
                    cursor,
                    error = %source,
                    "{}", constants::ERR_FIELD_DECODE
                );
                break;
            }
        }
    }
    Ok(values)
}

/// Size in bytes of one record made of fixed-width wire types
pub fn record_size(record: &[WireType]) -> usize {
    record.iter().filter_map(|ty| ty.fixed_size()).sum()
}

/// Decode fixed-size records until the remaining buffer cannot hold another one.
///
/// A trailing partial record is dropped without error. Single-field records
/// come back as bare values, wider ones as `Value::List`.
pub fn decode_repeated(
    buf: &[u8],
    cursor: &mut usize,
    record: &[WireType],
) -> std::result::Result<Value, FieldError> {
    let size = record_size(record);
    let mut items = Vec::new();
    if size == 0 {
        return Ok(Value::List(items));
    }

    while *cursor + size <= buf.len() {
        let mut fields = Vec::with_capacity(record.len());
        for ty in record {
            let (value, consumed) = ty.decode(buf, *cursor)?;
            *cursor += consumed;
            fields.push(value);
        }
        if fields.len() == 1 {
            items.extend(fields);
        } else {
            items.push(Value::List(fields));
        }
    }
    Ok(Value::List(items))
}

/// Inverse of [`decode_repeated`].
pub fn encode_repeated(
    value: &Value,
    out: &mut BytesMut,
    record: &[WireType],
) -> std::result::Result<(), FieldError> {
    let Value::List(items) = value else {
        return Err(FieldError::TypeMismatch {
            wire_type: "list",
            found: value.kind_name(),
        });
    };
    for item in items {
        match (record, item) {
            ([ty], item) => ty.encode(item, out)?,
            (record, Value::List(fields)) if fields.len() == record.len() => {
                for (ty, field) in record.iter().zip(fields) {
                    ty.encode(field, out)?;
                }
            }
            (_, other) => {
                return Err(FieldError::TypeMismatch {
                    wire_type: "record",
                    found: other.kind_name(),
                })
            }
        }
    }
    Ok(())
}

//! # Wire Types
//!
//! Primitive field encodings of the admin protocol. All integers are
//! little-endian and fixed width.
//!
//! | Wire type | Bytes | Notes |
//! |-----------|-------|-------|
//! | `U8` `U16` `U32` `U64` | 1 2 4 8 | unsigned |
//! | `I64` | 8 | signed |
//! | `Bool` | 1 | encodes 1/0, any nonzero byte decodes to `true` |
//! | `Str` | n + 1 | UTF-8 followed by a single `0x00` |
//! | `Date` | 4 | `u32` days since 0001-01-01, plus 366 |
//!
//! Every wire type shares one contract: [`WireType::encode`] appends the bytes of
//! a [`Value`], [`WireType::decode`] reads a value at an offset and reports how
//! many bytes it consumed. Trailing bytes after the value are left alone so a
//! caller can walk a payload field by field with its own cursor.

use crate::error::FieldError;
use bytes::{BufMut, BytesMut};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

/// Days between the server's day 0 and 0001-01-01 (year 0 is a leap year).
pub const DATE_OFFSET_DAYS: i64 = 366;

/// String terminator
pub const STRING_DELIMITER: u8 = 0x00;

/// Primitive wire encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    U8,
    U16,
    U32,
    U64,
    I64,
    Bool,
    Str,
    Date,
}

impl WireType {
    /// Human-readable name used in errors and logs
    pub const fn name(self) -> &'static str {
        match self {
            WireType::U8 => "u8",
            WireType::U16 => "u16",
            WireType::U32 => "u32",
            WireType::U64 => "u64",
            WireType::I64 => "i64",
            WireType::Bool => "bool",
            WireType::Str => "string",
            WireType::Date => "date",
        }
    }

    /// Encoded size in bytes, `None` for variable-length strings
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            WireType::U8 | WireType::Bool => Some(1),
            WireType::U16 => Some(2),
            WireType::U32 | WireType::Date => Some(4),
            WireType::U64 | WireType::I64 => Some(8),
            WireType::Str => None,
        }
    }

    /// Inclusive integer range representable by this type
    const fn int_range(self) -> Option<(i128, i128)> {
        match self {
            WireType::U8 => Some((0, u8::MAX as i128)),
            WireType::U16 => Some((0, u16::MAX as i128)),
            WireType::U32 => Some((0, u32::MAX as i128)),
            WireType::U64 => Some((0, u64::MAX as i128)),
            WireType::I64 => Some((i64::MIN as i128, i64::MAX as i128)),
            _ => None,
        }
    }

    /// Append the encoding of `value` to `out`.
    ///
    /// Nothing is written when an error is returned.
    pub fn encode(self, value: &Value, out: &mut BytesMut) -> Result<(), FieldError> {
        match (self, value) {
            (WireType::Bool, Value::Bool(b)) => out.put_u8(u8::from(*b)),
            (WireType::Bool, Value::Int(n)) => out.put_u8(u8::from(*n != 0)),
            (WireType::Str, Value::Str(s)) => {
                if s.as_bytes().contains(&STRING_DELIMITER) {
                    return Err(FieldError::InteriorNul);
                }
                out.reserve(s.len() + 1);
                out.put_slice(s.as_bytes());
                out.put_u8(STRING_DELIMITER);
            }
            (WireType::Date, Value::Date(date)) => {
                let days = date_to_days(*date);
                let days = u32::try_from(days).map_err(|_| FieldError::Range {
                    wire_type: self.name(),
                    value: i128::from(days),
                })?;
                out.put_u32_le(days);
            }
            (_, Value::Int(n)) => {
                let Some((min, max)) = self.int_range() else {
                    return Err(self.mismatch(value));
                };
                if *n < min || *n > max {
                    return Err(FieldError::Range {
                        wire_type: self.name(),
                        value: *n,
                    });
                }
                // range checked above, the casts below cannot truncate
                match self {
                    WireType::U8 => out.put_u8(*n as u8),
                    WireType::U16 => out.put_u16_le(*n as u16),
                    WireType::U32 => out.put_u32_le(*n as u32),
                    WireType::U64 => out.put_u64_le(*n as u64),
                    WireType::I64 => out.put_i64_le(*n as i64),
                    _ => unreachable!("int_range only covers integer wire types"),
                }
            }
            _ => return Err(self.mismatch(value)),
        }
        Ok(())
    }

    /// Convenience wrapper returning the encoded bytes
    pub fn encode_to_vec(self, value: &Value) -> Result<Vec<u8>, FieldError> {
        let mut out = BytesMut::new();
        self.encode(value, &mut out)?;
        Ok(out.to_vec())
    }

    /// Decode one value starting at `offset`.
    ///
    /// Returns the value and the number of bytes it occupied.
    pub fn decode(self, buf: &[u8], offset: usize) -> Result<(Value, usize), FieldError> {
        let rest = buf.get(offset..).unwrap_or_default();

        if self == WireType::Str {
            let end = rest
                .iter()
                .position(|b| *b == STRING_DELIMITER)
                .ok_or(FieldError::UnterminatedString)?;
            let content = std::str::from_utf8(&rest[..end])?;
            return Ok((Value::Str(content.to_owned()), end + 1));
        }

        let size = self.fixed_size().unwrap_or_default();
        if rest.len() < size {
            return Err(FieldError::ShortBuffer {
                wire_type: self.name(),
                needed: size,
                available: rest.len(),
            });
        }
        let bytes = &rest[..size];

        let value = match self {
            WireType::U8 => Value::Int(i128::from(bytes[0])),
            WireType::Bool => Value::Bool(bytes[0] != 0),
            WireType::U16 => Value::Int(i128::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            WireType::U32 => Value::Int(i128::from(read_u32(bytes))),
            WireType::U64 => Value::Int(i128::from(u64::from_le_bytes(read_8(bytes)))),
            WireType::I64 => Value::Int(i128::from(i64::from_le_bytes(read_8(bytes)))),
            WireType::Date => Value::Date(days_to_date(read_u32(bytes))?),
            WireType::Str => unreachable!("strings are handled above"),
        };
        Ok((value, size))
    }

    fn mismatch(self, value: &Value) -> FieldError {
        FieldError::TypeMismatch {
            wire_type: self.name(),
            found: value.kind_name(),
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

/// Day number as sent by the server for `date`
pub fn date_to_days(date: NaiveDate) -> i64 {
    // num_days_from_ce() is 1 for 0001-01-01
    i64::from(date.num_days_from_ce()) - 1 + DATE_OFFSET_DAYS
}

/// Calendar date for a day number sent by the server
pub fn days_to_date(days: u32) -> Result<NaiveDate, FieldError> {
    let from_ce = i64::from(days) - DATE_OFFSET_DAYS + 1;
    i32::try_from(from_ce)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or(FieldError::DateOutOfRange(i64::from(days)))
}

/// A decoded field value, independent of its wire width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i128),
    Bool(bool),
    Str(String),
    Date(NaiveDate),
    List(Vec<Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::List(_) => "list",
        }
    }
}

macro_rules! int_value {
    ($($t:ty => $wire:literal),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Int(i128::from(n))
                }
            }

            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, FieldError> {
                    match value {
                        Value::Int(n) => <$t>::try_from(n).map_err(|_| FieldError::Range {
                            wire_type: $wire,
                            value: n,
                        }),
                        other => Err(FieldError::TypeMismatch {
                            wire_type: $wire,
                            found: other.kind_name(),
                        }),
                    }
                }
            }
        )*
    };
}

/// Conversion from a decoded [`Value`] into a concrete Rust type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, FieldError>;
}

int_value!(u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64", i64 => "i64");

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<NaiveDate> for Value {
    fn from(date: NaiveDate) -> Self {
        Value::Date(date)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<u16, u16>> for Value {
    fn from(map: BTreeMap<u16, u16>) -> Self {
        Value::List(
            map.into_iter()
                .map(|(k, v)| Value::List(vec![k.into(), v.into()]))
                .collect(),
        )
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(n) => Ok(n != 0),
            other => Err(FieldError::TypeMismatch {
                wire_type: "bool",
                found: other.kind_name(),
            }),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(FieldError::TypeMismatch {
                wire_type: "string",
                found: other.kind_name(),
            }),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Date(d) => Ok(d),
            other => Err(FieldError::TypeMismatch {
                wire_type: "date",
                found: other.kind_name(),
            }),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(FieldError::TypeMismatch {
                wire_type: "list",
                found: other.kind_name(),
            }),
        }
    }
}

impl FromValue for BTreeMap<u16, u16> {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        let pairs: Vec<Vec<u16>> = FromValue::from_value(value)?;
        pairs
            .into_iter()
            .map(|pair| match pair[..] {
                [key, freq] => Ok((key, freq)),
                _ => Err(FieldError::TypeMismatch {
                    wire_type: "pair",
                    found: "list",
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_integer_little_endian() {
        assert_eq!(
            WireType::U16.encode_to_vec(&Value::Int(0x1234)).unwrap(),
            vec![0x34, 0x12]
        );
        assert_eq!(
            WireType::U32.encode_to_vec(&Value::Int(1)).unwrap(),
            vec![1, 0, 0, 0]
        );
        assert_eq!(
            WireType::I64.encode_to_vec(&Value::Int(-2)).unwrap(),
            vec![0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_integer_bounds() {
        let cases = [
            (WireType::U8, 0i128, u8::MAX as i128),
            (WireType::U16, 0, u16::MAX as i128),
            (WireType::U32, 0, u32::MAX as i128),
            (WireType::U64, 0, u64::MAX as i128),
            (WireType::I64, i64::MIN as i128, i64::MAX as i128),
        ];
        for (ty, min, max) in cases {
            assert!(ty.encode_to_vec(&Value::Int(max)).is_ok(), "{ty:?} max");
            assert!(ty.encode_to_vec(&Value::Int(min)).is_ok(), "{ty:?} min");
            assert!(
                matches!(
                    ty.encode_to_vec(&Value::Int(max + 1)),
                    Err(FieldError::Range { .. })
                ),
                "{ty:?} max+1"
            );
            assert!(
                matches!(
                    ty.encode_to_vec(&Value::Int(min - 1)),
                    Err(FieldError::Range { .. })
                ),
                "{ty:?} min-1"
            );
        }
        // -1 for every unsigned width
        for ty in [WireType::U8, WireType::U16, WireType::U32, WireType::U64] {
            assert!(matches!(
                ty.encode_to_vec(&Value::Int(-1)),
                Err(FieldError::Range { .. })
            ));
        }
    }

    #[test]
    fn test_short_buffer() {
        let err = WireType::U32.decode(&[1, 2, 3], 0).unwrap_err();
        assert_eq!(
            err,
            FieldError::ShortBuffer {
                wire_type: "u32",
                needed: 4,
                available: 3
            }
        );
        assert!(WireType::U8.decode(&[1], 1).is_err());
        assert!(WireType::U8.decode(&[1], 5).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let (value, size) = WireType::U16.decode(&[0x01, 0x02, 0xAA, 0xBB], 0).unwrap();
        assert_eq!(value, Value::Int(0x0201));
        assert_eq!(size, 2);

        let (value, size) = WireType::U8.decode(&[0x01, 0x02, 0xAA], 2).unwrap();
        assert_eq!(value, Value::Int(0xAA));
        assert_eq!(size, 1);
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        assert_eq!(WireType::Bool.decode(&[0], 0).unwrap(), (Value::Bool(false), 1));
        for byte in [1u8, 2, 0x7F, 0xFF] {
            assert_eq!(
                WireType::Bool.decode(&[byte], 0).unwrap(),
                (Value::Bool(true), 1)
            );
        }
        assert_eq!(WireType::Bool.encode_to_vec(&Value::Bool(true)).unwrap(), vec![1]);
        assert_eq!(WireType::Bool.encode_to_vec(&Value::Bool(false)).unwrap(), vec![0]);
    }

    #[test]
    fn test_string_with_trailing_garbage() {
        let buf = b"hello\0world\0";
        let (value, size) = WireType::Str.decode(buf, 0).unwrap();
        assert_eq!(value, Value::Str("hello".into()));
        assert_eq!(size, 6);

        let (value, size) = WireType::Str.decode(buf, 6).unwrap();
        assert_eq!(value, Value::Str("world".into()));
        assert_eq!(size, 6);
    }

    #[test]
    fn test_string_errors() {
        assert_eq!(
            WireType::Str.decode(b"no terminator", 0).unwrap_err(),
            FieldError::UnterminatedString
        );
        assert!(matches!(
            WireType::Str.decode(&[0xC3, 0x28, 0x00], 0),
            Err(FieldError::StringEncoding(_))
        ));
        assert_eq!(
            WireType::Str
                .encode_to_vec(&Value::Str("a\0b".into()))
                .unwrap_err(),
            FieldError::InteriorNul
        );
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(WireType::Str.encode_to_vec(&Value::Str(String::new())).unwrap(), vec![0]);
        assert_eq!(
            WireType::Str.decode(&[0], 0).unwrap(),
            (Value::Str(String::new()), 1)
        );
    }

    #[test]
    fn test_date_epoch_offset() {
        let bytes = WireType::Date.encode_to_vec(&Value::Date(date(1, 1, 1))).unwrap();
        assert_eq!(bytes, 366u32.to_le_bytes().to_vec());
        assert_eq!(date_to_days(date(1, 1, 2)), 367);
        assert_eq!(days_to_date(366).unwrap(), date(1, 1, 1));
    }

    #[test]
    fn test_date_roundtrip() {
        for d in [date(1, 1, 1), date(1950, 1, 1), date(1985, 5, 7), date(2222, 11, 30)] {
            let bytes = WireType::Date.encode_to_vec(&Value::Date(d)).unwrap();
            let (value, size) = WireType::Date.decode(&bytes, 0).unwrap();
            assert_eq!(value, Value::Date(d));
            assert_eq!(size, 4);
        }
    }

    #[test]
    fn test_date_before_server_epoch_rejected() {
        // anything before year 0 has a negative day number
        let err = WireType::Date
            .encode_to_vec(&Value::Date(date(-1, 1, 1)))
            .unwrap_err();
        assert!(matches!(err, FieldError::Range { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        assert!(matches!(
            WireType::U8.encode_to_vec(&Value::Str("x".into())),
            Err(FieldError::TypeMismatch { .. })
        ));
        assert!(matches!(
            WireType::Str.encode_to_vec(&Value::Int(1)),
            Err(FieldError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_from_value_conversions() {
        assert_eq!(u8::from_value(Value::Int(7)).unwrap(), 7);
        assert!(u8::from_value(Value::Int(300)).is_err());
        assert!(bool::from_value(Value::Bool(true)).unwrap());
        let map: BTreeMap<u16, u16> = BTreeMap::from([(0, 2), (5, 0x40)]);
        assert_eq!(BTreeMap::<u16, u16>::from_value(map.clone().into()).unwrap(), map);
    }
}

use std_alloc::borrow::Cow;
use std_alloc::vec::Vec;

use crate::{Record, RecordKind, Value};

/// Errors encountered while decoding a TLV payload or
/// interpreting a record's bytes as a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
  /// The input ended in the middle of a record header or value.
  UnexpectedEnd,
  /// An integer value had a width other than 1, 2, 4 or 8 bytes.
  IntWidth(usize),
  /// A float value had a width other than 4 or 8 bytes.
  FloatWidth(usize),
  /// A boolean value was not exactly one byte.
  BoolWidth(usize),
  /// A boolean byte was neither `0` nor `1`.
  BoolValue(u8),
  /// A string value was not valid UTF-8.
  Utf8(core::str::Utf8Error),
}

fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
  if bytes.len() < n {
    return Err(DecodeError::UnexpectedEnd);
  }

  let (head, rest) = bytes.split_at(n);
  *bytes = rest;
  Ok(head)
}

fn record<'a>(bytes: &mut &'a [u8]) -> Result<Record<'a>, DecodeError> {
  let head = take(bytes, 1)?[0];

  let kind = RecordKind::from_bits(head >> 6);
  let id = match (head >> 5) & 1 {
    | 0 => take(bytes, 1)?[0] as u16,
    | _ => {
      let bs = take(bytes, 2)?;
      u16::from_be_bytes([bs[0], bs[1]])
    },
  };

  let len = match (head >> 3) & 0b11 {
    | 0b00 => (head & 0b111) as usize,
    | 0b01 => take(bytes, 1)?[0] as usize,
    | 0b10 => {
      let bs = take(bytes, 2)?;
      u16::from_be_bytes([bs[0], bs[1]]) as usize
    },
    | _ => {
      let bs = take(bytes, 3)?;
      ((bs[0] as usize) << 16) | ((bs[1] as usize) << 8) | bs[2] as usize
    },
  };

  let mut value_bytes = take(bytes, len)?;

  let value = if kind.nests() {
    let mut children = Vec::new();
    while !value_bytes.is_empty() {
      children.push(record(&mut value_bytes)?);
    }
    Value::Nested(children)
  } else {
    Value::Bytes(Cow::Borrowed(value_bytes))
  };

  Ok(Record { kind, id, value })
}

/// Decode a TLV payload into the records it contains.
///
/// Leaf values borrow from `bytes`; use [`Record::into_owned`] to detach
/// them from the input buffer.
///
/// ```
/// use loam_tlv::{from_bytes, RecordKind};
///
/// // Resource 1, one-byte value 60
/// let rs = from_bytes(&[0b1100_0001, 1, 60]).unwrap();
///
/// assert_eq!(rs[0].kind, RecordKind::Resource);
/// assert_eq!(rs[0].id, 1);
/// assert_eq!(rs[0].int(), Ok(60));
/// ```
pub fn from_bytes(mut bytes: &[u8]) -> Result<Vec<Record<'_>>, DecodeError> {
  let mut records = Vec::new();

  while !bytes.is_empty() {
    records.push(record(&mut bytes)?);
  }

  Ok(records)
}

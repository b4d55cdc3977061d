//! Low-level representation of LwM2M TLV payloads.
//!
//! LwM2M resource values travel between peers in a compact
//! tag-length-value format. A payload is a flat sequence of [`Record`]s,
//! two of which ([object instances](RecordKind::ObjectInstance) and
//! [multiple resources](RecordKind::MultipleResource)) nest further
//! records in their value.
//!
//! ## Ownership
//! Decoding borrows: leaf values are `Cow::Borrowed` slices pointing into
//! the input buffer, so a decoded payload is only valid as long as the
//! datagram it came from. Encoding copies into a fresh buffer.
//!
//! Producers of records (e.g. an object answering a read) may hand out
//! `'static` borrows for fixed data or owned bytes for computed data;
//! [`Cow`](std_alloc::borrow::Cow) keeps track of which is which so
//! nothing is copied or freed twice.
//!
//! ```
//! use loam_tlv::{from_bytes, to_bytes, Record};
//!
//! let mut lifetime = Record::resource(1);
//! lifetime.set_int(86400);
//!
//! let bytes = to_bytes(&[lifetime]).unwrap();
//! let decoded = from_bytes(&bytes).unwrap();
//!
//! assert_eq!(decoded[0].int(), Ok(86400));
//! ```

// docs
#![doc(html_root_url = "https://docs.rs/loam-tlv/0.1.0")]
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// features
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc as std_alloc;

use std_alloc::borrow::Cow;
use std_alloc::string::String;
use std_alloc::vec::Vec;

mod from_bytes;
mod to_bytes;

pub use from_bytes::{from_bytes, DecodeError};
pub use to_bytes::{to_bytes, EncodeError};

/// The four top-level TLV types.
///
/// ```text
/// Type of the record
/// |
/// |  Id is 2 bytes wide (1 byte when unset)
/// |  |
/// |  |  Width of the length field in bytes (0 = length lives here)
/// |  |  |
/// |  |  |  Length, when it fits in 3 bits
/// |  |  |  |
/// vv v vv vvv
/// 11 0 00 101
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
  /// A whole object instance; nests one record per resource.
  ObjectInstance,
  /// One element of a multiple resource, identified by its index.
  ResourceInstance,
  /// A resource with multiple elements; nests
  /// [resource instances](RecordKind::ResourceInstance).
  MultipleResource,
  /// A single-value resource.
  Resource,
}

impl RecordKind {
  pub(crate) fn bits(self) -> u8 {
    match self {
      | Self::ObjectInstance => 0b00,
      | Self::ResourceInstance => 0b01,
      | Self::MultipleResource => 0b10,
      | Self::Resource => 0b11,
    }
  }

  pub(crate) fn from_bits(b: u8) -> Self {
    match b & 0b11 {
      | 0b00 => Self::ObjectInstance,
      | 0b01 => Self::ResourceInstance,
      | 0b10 => Self::MultipleResource,
      | _ => Self::Resource,
    }
  }

  /// Whether records of this kind carry nested records rather than bytes.
  pub fn nests(self) -> bool {
    matches!(self, Self::ObjectInstance | Self::MultipleResource)
  }
}

/// The value carried by a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
  /// Raw bytes of a leaf record. Borrowed when decoded or when the
  /// producer handed out static storage, owned otherwise.
  Bytes(Cow<'a, [u8]>),
  /// Child records of an object instance or multiple resource.
  Nested(Vec<Record<'a>>),
}

impl<'a> Default for Value<'a> {
  fn default() -> Self {
    Value::Bytes(Cow::Borrowed(&[]))
  }
}

/// One TLV record: a kind, a 16-bit id and a value.
///
/// Typed accessors ([`int`](Record::int), [`boolean`](Record::boolean),
/// [`str`](Record::str), [`float`](Record::float)) interpret the raw
/// bytes of a leaf record; the corresponding setters produce the
/// shortest valid wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record<'a> {
  /// Top-level type of this record.
  pub kind: RecordKind,
  /// Identifier; a resource id, resource-instance index or instance id
  /// depending on `kind`.
  pub id: u16,
  /// The payload.
  pub value: Value<'a>,
}

impl Default for RecordKind {
  fn default() -> Self {
    RecordKind::Resource
  }
}

impl<'a> Record<'a> {
  /// A single-value resource with an empty value.
  pub fn resource(id: u16) -> Self {
    Record { kind: RecordKind::Resource,
             id,
             value: Value::default() }
  }

  /// One element of a multiple resource.
  pub fn resource_instance(id: u16) -> Self {
    Record { kind: RecordKind::ResourceInstance,
             id,
             value: Value::default() }
  }

  /// A multiple resource wrapping `elements`, which should all be
  /// [resource instances](Record::resource_instance).
  pub fn multiple(id: u16, elements: Vec<Record<'a>>) -> Self {
    Record { kind: RecordKind::MultipleResource,
             id,
             value: Value::Nested(elements) }
  }

  /// An object instance wrapping one record per resource.
  pub fn object_instance(id: u16, resources: Vec<Record<'a>>) -> Self {
    Record { kind: RecordKind::ObjectInstance,
             id,
             value: Value::Nested(resources) }
  }

  /// The raw bytes of a leaf record; empty for nesting records.
  pub fn bytes(&self) -> &[u8] {
    match &self.value {
      | Value::Bytes(b) => b,
      | Value::Nested(_) => &[],
    }
  }

  /// The child records of a nesting record; empty for leaves.
  pub fn children(&self) -> &[Record<'a>] {
    match &self.value {
      | Value::Bytes(_) => &[],
      | Value::Nested(rs) => rs,
    }
  }

  /// Store a signed integer as big-endian bytes, using the shortest of
  /// the four allowed widths (1, 2, 4 or 8 bytes).
  ///
  /// ```
  /// use loam_tlv::Record;
  ///
  /// let mut r = Record::resource(0);
  /// r.set_int(600);
  /// assert_eq!(r.bytes(), &[0x02, 0x58]);
  /// ```
  pub fn set_int(&mut self, n: i64) {
    let bytes: Vec<u8> = if i8::try_from(n).is_ok() {
      Vec::from((n as i8).to_be_bytes())
    } else if i16::try_from(n).is_ok() {
      Vec::from((n as i16).to_be_bytes())
    } else if i32::try_from(n).is_ok() {
      Vec::from((n as i32).to_be_bytes())
    } else {
      Vec::from(n.to_be_bytes())
    };

    self.value = Value::Bytes(Cow::Owned(bytes));
  }

  /// Interpret the value as a big-endian signed integer.
  pub fn int(&self) -> Result<i64, DecodeError> {
    let bs = self.bytes();
    match bs.len() {
      | 1 => Ok(bs[0] as i8 as i64),
      | 2 => Ok(i16::from_be_bytes([bs[0], bs[1]]) as i64),
      | 4 => Ok(i32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]]) as i64),
      | 8 => {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bs);
        Ok(i64::from_be_bytes(arr))
      },
      | n => Err(DecodeError::IntWidth(n)),
    }
  }

  /// Store a boolean as a single `0` or `1` byte.
  pub fn set_bool(&mut self, b: bool) {
    self.value = Value::Bytes(Cow::Borrowed(if b { &[1] } else { &[0] }));
  }

  /// Interpret the value as a boolean.
  pub fn boolean(&self) -> Result<bool, DecodeError> {
    match self.bytes() {
      | [0] => Ok(false),
      | [1] => Ok(true),
      | [b] => Err(DecodeError::BoolValue(*b)),
      | bs => Err(DecodeError::BoolWidth(bs.len())),
    }
  }

  /// Store a string as its UTF-8 bytes, copying them.
  pub fn set_str(&mut self, s: &str) {
    self.value = Value::Bytes(Cow::Owned(Vec::from(s.as_bytes())));
  }

  /// Store a string that lives at least as long as the record,
  /// without copying.
  pub fn set_borrowed_str(&mut self, s: &'a str) {
    self.value = Value::Bytes(Cow::Borrowed(s.as_bytes()));
  }

  /// Interpret the value as UTF-8 text.
  pub fn str(&self) -> Result<&str, DecodeError> {
    core::str::from_utf8(self.bytes()).map_err(DecodeError::Utf8)
  }

  /// Store raw opaque bytes, copying them.
  pub fn set_opaque(&mut self, bs: &[u8]) {
    self.value = Value::Bytes(Cow::Owned(Vec::from(bs)));
  }

  /// Store raw opaque bytes that live at least as long as the record,
  /// without copying.
  pub fn set_borrowed_opaque(&mut self, bs: &'a [u8]) {
    self.value = Value::Bytes(Cow::Borrowed(bs));
  }

  /// Store an IEEE-754 float big-endian, in 4 bytes when the value
  /// survives the round-trip through `f32` and 8 bytes otherwise.
  pub fn set_float(&mut self, f: f64) {
    let bytes: Vec<u8> = if f64::from(f as f32) == f || f.is_nan() {
      Vec::from((f as f32).to_be_bytes())
    } else {
      Vec::from(f.to_be_bytes())
    };

    self.value = Value::Bytes(Cow::Owned(bytes));
  }

  /// Interpret the value as a big-endian IEEE-754 float.
  pub fn float(&self) -> Result<f64, DecodeError> {
    let bs = self.bytes();
    match bs.len() {
      | 4 => Ok(f32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]]) as f64),
      | 8 => {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bs);
        Ok(f64::from_be_bytes(arr))
      },
      | n => Err(DecodeError::FloatWidth(n)),
    }
  }

  /// Deep-copy into a record that owns all of its bytes,
  /// detaching it from the buffer it was decoded from.
  pub fn into_owned(self) -> Record<'static> {
    let value = match self.value {
      | Value::Bytes(b) => Value::Bytes(Cow::Owned(b.into_owned())),
      | Value::Nested(rs) => {
        Value::Nested(rs.into_iter().map(Record::into_owned).collect())
      },
    };

    Record { kind: self.kind,
             id: self.id,
             value }
  }
}

/// Render a record tree for log lines: `</id>=len` leaves,
/// `<id>[..]` nesting.
pub fn summary(records: &[Record]) -> String {
  use core::fmt::Write;

  let mut out = String::new();
  for (i, r) in records.iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    match &r.value {
      | Value::Bytes(b) => write!(out, "{}({}B)", r.id, b.len()).ok(),
      | Value::Nested(rs) => write!(out, "{}[{}]", r.id, summary(rs)).ok(),
    };
  }
  out
}

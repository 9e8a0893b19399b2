//! Netlink attribute (NLA) trees.
//!
//! Every attribute is a TLV record:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Length (2 bytes) │  Type (2 bytes)     │  <- NLA header (4 bytes)
//! ├─────────────────────────────────────────┤
//! │  Value (variable length, padded to 4)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The length covers the header and the value but not the padding. The two top
//! bits of the type carry [`NLA_F_NESTED`] and [`NLA_F_NET_BYTEORDER`]. A nested
//! attribute's value is itself a sequence of attributes.
//!
//! Reference: <linux/netlink.h>

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::align;
use crate::constants::{NLA_F_NESTED, NLA_F_NET_BYTEORDER, NLA_HEADER_SIZE, NLA_TYPE_MASK};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("attribute header truncated: {0} bytes left")]
    Truncated(usize),
    #[error("attribute length {len} out of bounds ({remaining} bytes left)")]
    Length { len: usize, remaining: usize },
    #[error("attribute {kind} is too large to encode ({len} bytes)")]
    Oversized { kind: u16, len: usize },
    #[error("attribute {kind}: expected {expected}, got {actual} bytes")]
    Payload { kind: u16, expected: &'static str, actual: usize },
    #[error("attribute {kind}: expected a nested attribute")]
    NotNested { kind: u16 },
    #[error("attribute {kind}: invalid string")]
    InvalidString { kind: u16 },
    #[error("missing attribute {kind} in {context}")]
    Missing { kind: u16, context: &'static str },
}

/// The value of an attribute: raw bytes, or a list of child attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NlaValue {
    Bytes(Bytes),
    Nested(Vec<Nla>),
}

/// A single netlink attribute.
///
/// Attributes with unknown kinds are kept as-is, so re-encoding a decoded tree
/// reproduces the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nla {
    /// Attribute type, with the flag bits cleared.
    kind: u16,
    /// Whether the value is in network byte order.
    net_byteorder: bool,
    value: NlaValue,
}

impl Nla {
    /// Creates a leaf attribute holding raw bytes.
    pub fn bytes(kind: impl Into<u16>, value: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.into() & NLA_TYPE_MASK,
            net_byteorder: false,
            value: NlaValue::Bytes(value.into()),
        }
    }

    /// Creates a nested attribute.
    pub fn nested(kind: impl Into<u16>, children: Vec<Nla>) -> Self {
        Self {
            kind: kind.into() & NLA_TYPE_MASK,
            net_byteorder: false,
            value: NlaValue::Nested(children),
        }
    }

    /// Marks the value as being in network byte order.
    pub fn with_net_byteorder(mut self) -> Self {
        self.net_byteorder = true;
        self
    }

    #[inline]
    pub fn kind(&self) -> u16 {
        self.kind
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        matches!(self.value, NlaValue::Nested(_))
    }

    #[inline]
    pub fn is_net_byteorder(&self) -> bool {
        self.net_byteorder
    }

    #[inline]
    pub fn value(&self) -> &NlaValue {
        &self.value
    }

    /// Returns the raw payload of a leaf attribute.
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.value {
            NlaValue::Bytes(bytes) => Some(bytes),
            NlaValue::Nested(_) => None,
        }
    }

    /// Returns the children of a nested attribute.
    pub fn children(&self) -> Result<&[Nla], Error> {
        match &self.value {
            NlaValue::Nested(children) => Ok(children),
            NlaValue::Bytes(_) => Err(Error::NotNested { kind: self.kind }),
        }
    }

    /// The type field as it appears on the wire, flag bits included.
    #[inline]
    pub fn wire_kind(&self) -> u16 {
        let mut kind = self.kind;
        if self.is_nested() {
            kind |= NLA_F_NESTED;
        }
        if self.net_byteorder {
            kind |= NLA_F_NET_BYTEORDER;
        }
        kind
    }

    /// Length of the value, without header and without trailing padding.
    pub fn value_len(&self) -> usize {
        match &self.value {
            NlaValue::Bytes(bytes) => bytes.len(),
            NlaValue::Nested(children) => buffer_len(children),
        }
    }

    /// Total encoded length, padding included.
    #[inline]
    pub fn buffer_len(&self) -> usize {
        align(NLA_HEADER_SIZE + self.value_len())
    }

    /// Writes the attribute (and its children) into `dst`.
    pub fn emit(&self, dst: &mut BytesMut) -> Result<(), Error> {
        let len = NLA_HEADER_SIZE + self.value_len();
        let wire_len = u16::try_from(len).map_err(|_| Error::Oversized { kind: self.kind, len })?;

        dst.reserve(align(len));
        dst.put_u16_ne(wire_len);
        dst.put_u16_ne(self.wire_kind());

        match &self.value {
            NlaValue::Bytes(bytes) => dst.put_slice(bytes),
            NlaValue::Nested(children) => {
                for child in children {
                    child.emit(dst)?;
                }
            }
        }

        dst.put_bytes(0, align(len) - len);

        Ok(())
    }
}

/// Total encoded length of a list of attributes.
pub fn buffer_len(attrs: &[Nla]) -> usize {
    attrs.iter().map(Nla::buffer_len).sum()
}

/// Encodes a list of attributes.
pub fn encode(attrs: &[Nla]) -> Result<Bytes, Error> {
    let mut dst = BytesMut::with_capacity(buffer_len(attrs));
    for attr in attrs {
        attr.emit(&mut dst)?;
    }

    Ok(dst.freeze())
}

/// Decodes a list of attributes.
///
/// Only the length field bounds each payload; the padding up to the next
/// 4-byte boundary is skipped. Nested attributes are decoded recursively.
pub fn decode(mut buf: &[u8]) -> Result<Vec<Nla>, Error> {
    let mut attrs = Vec::new();

    while !buf.is_empty() {
        if buf.len() < NLA_HEADER_SIZE {
            return Err(Error::Truncated(buf.len()));
        }

        let len = u16::from_ne_bytes([buf[0], buf[1]]) as usize;
        let wire_kind = u16::from_ne_bytes([buf[2], buf[3]]);

        if len < NLA_HEADER_SIZE || len > buf.len() {
            return Err(Error::Length { len, remaining: buf.len() });
        }

        let payload = &buf[NLA_HEADER_SIZE..len];
        let kind = wire_kind & NLA_TYPE_MASK;

        let value = if wire_kind & NLA_F_NESTED != 0 {
            NlaValue::Nested(decode(payload)?)
        } else {
            NlaValue::Bytes(Bytes::copy_from_slice(payload))
        };

        attrs.push(Nla { kind, net_byteorder: wire_kind & NLA_F_NET_BYTEORDER != 0, value });

        // The last attribute of a buffer may come without its padding.
        buf = &buf[align(len).min(buf.len())..];
    }

    Ok(attrs)
}

/// Returns the first attribute of the given kind.
pub fn find(attrs: &[Nla], kind: impl Into<u16>) -> Option<&Nla> {
    let kind = kind.into();
    attrs.iter().find(|attr| attr.kind == kind)
}

/// Returns every attribute of the given kind, in order.
pub fn find_all(attrs: &[Nla], kind: impl Into<u16>) -> impl Iterator<Item = &Nla> {
    let kind = kind.into();
    attrs.iter().filter(move |attr| attr.kind == kind)
}

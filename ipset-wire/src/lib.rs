//! Wire formats for the ipset control plane.
//!
//! Requests and replies travel over `NETLINK_NETFILTER` as netlink messages: a
//! fixed 16-byte header, the 4-byte `nfgenmsg` family header, and a tree of
//! TLV attributes. [`nla`] encodes and decodes the raw attribute tree, [`attr`]
//! names the attribute kinds the ipset subsystem knows about, and [`message`]
//! handles the envelope.

pub mod attr;
pub mod constants;
pub mod message;
pub mod nla;

pub use attr::{AdtAttr, CadtAttr, IpAttr, SetAttr};
pub use message::{Codec, ErrorMessage, GenMsg, Header, Message, Payload};
pub use nla::{Nla, NlaValue};

/// Rounds `len` up to the next netlink alignment boundary (4 bytes).
#[inline]
pub const fn align(len: usize) -> usize {
    (len + constants::NLA_ALIGNTO - 1) & !(constants::NLA_ALIGNTO - 1)
}

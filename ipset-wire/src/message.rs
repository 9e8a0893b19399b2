//! The netlink message envelope.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ nlmsghdr (16 bytes, host order)         │
//! │   length u32, type u16, flags u16,      │
//! │   sequence u32, port u32                │
//! ├─────────────────────────────────────────┤
//! │ nfgenmsg (4 bytes)                      │
//! │   family u8, version u8, res_id u16 BE  │
//! ├─────────────────────────────────────────┤
//! │ Attributes (TLV format)                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `NLMSG_ERROR` replies carry an `i32` error code followed by the header of the
//! request they answer instead of `nfgenmsg` and attributes. A code of zero is an
//! acknowledgement. `NLMSG_DONE` terminates a multi-part dump.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::align;
use crate::constants::{
    NFGENMSG_LEN, NFNETLINK_V0, NFNL_SUBSYS_IPSET, NFPROTO_IPV4, NLMSG_DONE, NLMSG_ERROR,
    NLMSG_HDRLEN, NLMSG_MIN_TYPE, NLMSG_NOOP, NLMSG_OVERRUN, NLM_F_MULTI,
};
use crate::nla::{self, Nla};

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("message truncated: {0} bytes left")]
    Truncated(usize),
    #[error("message length {length} out of bounds ({available} bytes available)")]
    Length { length: u32, available: usize },
    #[error("message too large to encode ({0} bytes)")]
    Oversized(usize),
    #[error("malformed body of message type {message_type}: {reason}")]
    Body { message_type: u16, reason: &'static str },
    #[error("malformed attribute: {0}")]
    Attribute(#[from] nla::Error),
}

/// The netlink message header (`struct nlmsghdr`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Length of the message, header included.
    pub length: u32,
    pub message_type: u16,
    pub flags: u16,
    pub sequence: u32,
    /// Port id of the sender, 0 for the kernel.
    pub port: u32,
}

impl Header {
    /// Returns the length of the header in bytes.
    #[inline]
    pub const fn len() -> usize {
        NLMSG_HDRLEN
    }

    fn emit(&self, dst: &mut BytesMut) {
        dst.put_u32_ne(self.length);
        dst.put_u16_ne(self.message_type);
        dst.put_u16_ne(self.flags);
        dst.put_u32_ne(self.sequence);
        dst.put_u32_ne(self.port);
    }

    fn parse(mut src: &[u8]) -> Result<Self, Error> {
        if src.len() < NLMSG_HDRLEN {
            return Err(Error::Truncated(src.len()));
        }

        Ok(Self {
            length: src.get_u32_ne(),
            message_type: src.get_u16_ne(),
            flags: src.get_u16_ne(),
            sequence: src.get_u32_ne(),
            port: src.get_u32_ne(),
        })
    }
}

/// The nfnetlink family header (`struct nfgenmsg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenMsg {
    pub family: u8,
    pub version: u8,
    /// Resource id, big-endian on the wire.
    pub res_id: u16,
}

impl Default for GenMsg {
    fn default() -> Self {
        Self { family: NFPROTO_IPV4, version: NFNETLINK_V0, res_id: 0 }
    }
}

impl GenMsg {
    pub fn new(family: u8) -> Self {
        Self { family, ..Default::default() }
    }
}

/// Body of an `NLMSG_ERROR` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Zero for an acknowledgement, otherwise a negated error number.
    pub code: i32,
    /// Header of the request this message answers.
    pub header: Header,
}

impl ErrorMessage {
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// An ipset request or reply: family header plus attributes.
    Set { genmsg: GenMsg, attributes: Vec<Nla> },
    Error(ErrorMessage),
    /// End of a dump, with the status the kernel attached to it.
    Done(i32),
    Noop,
    Overrun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
}

impl Message {
    /// Creates a new message. The length is computed when the message is emitted.
    pub fn new(message_type: u16, flags: u16, sequence: u32, payload: Payload) -> Self {
        Self {
            header: Header { length: 0, message_type, flags, sequence, port: 0 },
            payload,
        }
    }

    /// Creates an ipset message carrying attributes.
    pub fn set(
        message_type: u16,
        flags: u16,
        sequence: u32,
        genmsg: GenMsg,
        attributes: Vec<Nla>,
    ) -> Self {
        Self::new(message_type, flags, sequence, Payload::Set { genmsg, attributes })
    }

    /// Creates an error message (or an acknowledgement if `code` is 0) answering `request`.
    pub fn error(code: i32, request: Header) -> Self {
        Self::new(NLMSG_ERROR, 0, request.sequence, Payload::Error(ErrorMessage { code, header: request }))
    }

    /// Creates the message terminating a dump.
    pub fn done(sequence: u32) -> Self {
        Self::new(NLMSG_DONE, NLM_F_MULTI, sequence, Payload::Done(0))
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    #[inline]
    pub fn is_multipart(&self) -> bool {
        self.header.flags & NLM_F_MULTI != 0
    }

    /// Returns the ipset command of this message, if it belongs to the ipset subsystem.
    pub fn command(&self) -> Option<u8> {
        let [subsys, cmd] = self.header.message_type.to_be_bytes();
        (subsys == NFNL_SUBSYS_IPSET && matches!(self.payload, Payload::Set { .. })).then_some(cmd)
    }

    /// Returns the attributes of an ipset message, or an empty slice for control messages.
    pub fn attributes(&self) -> &[Nla] {
        match &self.payload {
            Payload::Set { attributes, .. } => attributes,
            _ => &[],
        }
    }

    fn body_len(&self) -> usize {
        match &self.payload {
            Payload::Set { attributes, .. } => NFGENMSG_LEN + nla::buffer_len(attributes),
            Payload::Error(_) => 4 + NLMSG_HDRLEN,
            Payload::Done(_) => 4,
            Payload::Noop | Payload::Overrun => 0,
        }
    }

    /// Exact size of the message on the wire, without trailing alignment.
    #[inline]
    pub fn size(&self) -> usize {
        NLMSG_HDRLEN + self.body_len()
    }

    /// Writes the message into `dst`, computing the length field.
    pub fn emit(&self, dst: &mut BytesMut) -> Result<(), Error> {
        let size = self.size();
        let length = u32::try_from(size).map_err(|_| Error::Oversized(size))?;

        dst.reserve(align(size));
        Header { length, ..self.header }.emit(dst);

        match &self.payload {
            Payload::Set { genmsg, attributes } => {
                dst.put_u8(genmsg.family);
                dst.put_u8(genmsg.version);
                dst.put_u16(genmsg.res_id);
                for attr in attributes {
                    attr.emit(dst)?;
                }
            }
            Payload::Error(err) => {
                dst.put_i32_ne(err.code);
                err.header.emit(dst);
            }
            Payload::Done(code) => dst.put_i32_ne(*code),
            Payload::Noop | Payload::Overrun => {}
        }

        Ok(())
    }

    /// Parses a single message from the start of `src`, returning the message and
    /// the number of bytes it occupies (alignment padding included, when present).
    pub fn parse(src: &[u8]) -> Result<(Self, usize), Error> {
        let header = Header::parse(src)?;
        let length = header.length as usize;

        if length < NLMSG_HDRLEN || length > src.len() {
            return Err(Error::Length { length: header.length, available: src.len() });
        }

        let body = &src[NLMSG_HDRLEN..length];
        let payload = parse_body(&header, body)?;

        Ok((Self { header, payload }, align(length).min(src.len())))
    }
}

fn parse_body(header: &Header, mut body: &[u8]) -> Result<Payload, Error> {
    let malformed = |reason| Error::Body { message_type: header.message_type, reason };

    match header.message_type {
        NLMSG_NOOP => Ok(Payload::Noop),
        NLMSG_OVERRUN => Ok(Payload::Overrun),
        NLMSG_ERROR => {
            if body.len() < 4 + NLMSG_HDRLEN {
                return Err(malformed("error message shorter than code and request header"));
            }
            let code = body.get_i32_ne();
            let request = Header::parse(body)?;
            Ok(Payload::Error(ErrorMessage { code, header: request }))
        }
        // The status is optional; older kernels send an empty body.
        NLMSG_DONE => Ok(Payload::Done(if body.len() >= 4 { body.get_i32_ne() } else { 0 })),
        t if t < NLMSG_MIN_TYPE => Err(malformed("reserved control message type")),
        _ => {
            if body.len() < NFGENMSG_LEN {
                return Err(malformed("missing nfgenmsg header"));
            }
            let genmsg =
                GenMsg { family: body.get_u8(), version: body.get_u8(), res_id: body.get_u16() };
            let attributes = nla::decode(body)?;
            Ok(Payload::Set { genmsg, attributes })
        }
    }
}

/// Encodes an ipset message.
pub fn wrap(
    message_type: u16,
    flags: u16,
    sequence: u32,
    genmsg: GenMsg,
    attributes: Vec<Nla>,
) -> Result<Bytes, Error> {
    let message = Message::set(message_type, flags, sequence, genmsg, attributes);
    let mut dst = BytesMut::with_capacity(message.size());
    message.emit(&mut dst)?;

    Ok(dst.freeze())
}

/// Encodes several messages into one datagram, each aligned to 4 bytes.
pub fn wrap_all(messages: &[Message]) -> Result<Bytes, Error> {
    let mut dst = BytesMut::with_capacity(messages.iter().map(|m| align(m.size())).sum());
    for message in messages {
        message.emit(&mut dst)?;
        dst.put_bytes(0, align(dst.len()) - dst.len());
    }

    Ok(dst.freeze())
}

/// Decodes exactly one message.
pub fn unwrap(src: &[u8]) -> Result<Message, Error> {
    Message::parse(src).map(|(message, _)| message)
}

/// Decodes every message in a datagram. The kernel batches several messages
/// (typically dump parts and the final `NLMSG_DONE`) into one read.
pub fn unwrap_all(mut src: &[u8]) -> Result<Vec<Message>, Error> {
    let mut messages = Vec::new();
    while !src.is_empty() {
        let (message, consumed) = Message::parse(src)?;
        tracing::trace!(
            seq = message.header.sequence,
            message_type = message.header.message_type,
            len = message.header.length,
            "decoded message"
        );
        messages.push(message);
        src = &src[consumed..];
    }

    Ok(messages)
}

/// Stream codec for netlink messages, for use with [`tokio_util::codec::Framed`]
/// and friends.
#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < Header::len() {
            return Ok(None);
        }

        // Peek at the length without advancing the cursor
        let length = u32::from_ne_bytes([src[0], src[1], src[2], src[3]]);
        if (length as usize) < Header::len() {
            return Err(Error::Length { length, available: src.len() });
        }

        if src.len() < length as usize {
            src.reserve(length as usize - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length as usize);
        let (message, _) = Message::parse(&frame)?;

        // Skip the alignment padding, if it already arrived.
        let padding = (align(length as usize) - length as usize).min(src.len());
        src.advance(padding);

        Ok(Some(message))
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.emit(dst)?;
        // Keep the next frame aligned.
        let size = item.size();
        dst.put_bytes(0, align(size) - size);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::SetAttr;
    use crate::constants::{ipset_msg_type, IPSET_CMD_LIST, NLM_F_ACK, NLM_F_REQUEST};

    fn list_reply(seq: u32) -> Message {
        let mut msg = Message::set(
            ipset_msg_type(IPSET_CMD_LIST),
            NLM_F_MULTI,
            seq,
            GenMsg::default(),
            vec![Nla::u8(SetAttr::Protocol, 6), Nla::string(SetAttr::SetName, "a")],
        );
        msg.header.port = 1234;
        msg
    }

    fn to_bytes(messages: &[Message]) -> BytesMut {
        let mut codec = Codec::new();
        let mut buf = BytesMut::new();
        for msg in messages {
            codec.encode(msg.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn length_is_computed() {
        let buf = wrap(
            ipset_msg_type(IPSET_CMD_LIST),
            NLM_F_REQUEST | NLM_F_ACK,
            7,
            GenMsg::default(),
            vec![Nla::u8(SetAttr::Protocol, 6)],
        )
        .unwrap();

        // header + nfgenmsg + one padded u8 attribute
        assert_eq!(buf.len(), 16 + 4 + 8);
        assert_eq!(u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]), 28);

        let msg = unwrap(&buf).unwrap();
        assert_eq!(msg.header.length, 28);
        assert_eq!(msg.sequence(), 7);
        assert_eq!(msg.command(), Some(IPSET_CMD_LIST));
        assert_eq!(msg.attributes()[0].as_u8().unwrap(), 6);
    }

    #[test]
    fn ack_and_error_parse_as_error_body() {
        let request = Header { length: 28, message_type: 0x0609, flags: 5, sequence: 3, port: 0 };

        let buf = to_bytes(&[Message::error(0, request), Message::error(-17, request)]);
        let msgs = unwrap_all(&buf).unwrap();

        assert_eq!(msgs.len(), 2);
        match &msgs[0].payload {
            Payload::Error(err) => {
                assert!(err.is_ack());
                assert_eq!(err.header, request);
            }
            other => panic!("expected ack, got {other:?}"),
        }
        assert!(matches!(&msgs[1].payload, Payload::Error(err) if err.code == -17));
    }

    #[test]
    fn done_marks_end_of_dump() {
        let buf = to_bytes(&[list_reply(9), Message::done(9)]);
        let msgs = unwrap_all(&buf).unwrap();

        assert!(msgs[0].is_multipart());
        assert_eq!(msgs[1].payload, Payload::Done(0));
        assert!(msgs[1].attributes().is_empty());
    }

    #[test]
    fn done_without_status_is_accepted() {
        let mut buf = BytesMut::new();
        Header { length: 16, message_type: NLMSG_DONE, flags: NLM_F_MULTI, sequence: 1, port: 0 }
            .emit(&mut buf);
        assert_eq!(unwrap(&buf).unwrap().payload, Payload::Done(0));
    }

    #[test]
    fn length_below_header_is_malformed() {
        let mut buf = to_bytes(&[list_reply(1)]);
        buf[0..4].copy_from_slice(&8u32.to_ne_bytes());
        assert!(matches!(unwrap(&buf), Err(Error::Length { length: 8, .. })));
    }

    #[test]
    fn length_past_buffer_is_malformed() {
        let buf = to_bytes(&[list_reply(1)]);
        assert!(matches!(unwrap(&buf[..20]), Err(Error::Length { .. })));
        assert!(matches!(unwrap(&buf[..10]), Err(Error::Truncated(10))));
    }

    #[test]
    fn short_error_body_is_malformed() {
        let mut buf = BytesMut::new();
        Header { length: 20, message_type: NLMSG_ERROR, flags: 0, sequence: 1, port: 0 }
            .emit(&mut buf);
        buf.put_i32_ne(-1);
        assert!(matches!(unwrap(&buf), Err(Error::Body { message_type: NLMSG_ERROR, .. })));
    }

    #[test]
    fn codec_waits_for_complete_frames() {
        let full = to_bytes(&[list_reply(4), Message::done(4)]);
        let mut codec = Codec::new();

        let mut partial = BytesMut::from(&full[..10]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut src = full.clone();
        let first = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(first, {
            let mut expected = list_reply(4);
            expected.header.length = first.header.length;
            expected
        });
        let second = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(second.payload, Payload::Done(0));
        assert!(src.is_empty());
    }
}

//! The simulated ipset subsystem.
//!
//! [`Kernel::handle`] takes one request datagram and returns the datagrams the
//! kernel would answer with: data messages, then an acknowledgement if one was
//! requested, or a single error message.

use std::net::IpAddr;

use bytes::Bytes;
use nix::errno::Errno;

use ipset_wire::{
    constants::*,
    message::{self, wrap_all},
    nla::find,
    AdtAttr, CadtAttr, GenMsg, Header, IpAttr, Message, Nla, SetAttr,
};

use crate::set::{CreateParams, Entry, HashIpSet, REVISION_MAX, REVISION_MIN, TYPE_NAME};

/// Kernel error numbers are positive here and negated on the wire.
type KernelResult<T> = Result<T, i32>;

#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Entries per dump message. A set with more entries is listed across
    /// several messages.
    pub dump_chunk: usize,
    /// Maximum number of sets.
    pub max_sets: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self { dump_chunk: 64, max_sets: 256 }
    }
}

impl SimOptions {
    pub fn with_dump_chunk(mut self, dump_chunk: usize) -> Self {
        self.dump_chunk = dump_chunk.max(1);
        self
    }

    pub fn with_max_sets(mut self, max_sets: usize) -> Self {
        self.max_sets = max_sets;
        self
    }
}

enum Reply {
    Ack,
    Data(Vec<Nla>),
    Dump(Vec<Vec<Nla>>),
}

/// An in-memory ipset kernel.
#[derive(Debug, Default)]
pub struct Kernel {
    options: SimOptions,
    /// Sets in creation order, which is the order they are listed in.
    sets: Vec<HashIpSet>,
}

impl Kernel {
    pub fn new(options: SimOptions) -> Self {
        Self { options, sets: Vec::new() }
    }

    /// Names of all sets, in listing order.
    pub fn set_names(&self) -> Vec<String> {
        self.sets.iter().map(|set| set.name.clone()).collect()
    }

    /// Number of entries in a set.
    pub fn entry_count(&self, name: &str) -> Option<usize> {
        self.find(name).ok().map(|idx| self.sets[idx].len())
    }

    /// Whether `addr` is a member of the set.
    pub fn contains(&self, name: &str, addr: &IpAddr) -> bool {
        self.find(name).is_ok_and(|idx| self.sets[idx].contains(addr))
    }

    /// Handles one request datagram.
    pub fn handle(&mut self, datagram: &[u8]) -> Vec<Bytes> {
        let request = match message::unwrap(datagram) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = ?e, "dropping malformed request");
                return Vec::new();
            }
        };

        let header = request.header;
        let result = self.dispatch(&request);
        if let Err(code) = result {
            tracing::debug!(seq = header.sequence, message_type = header.message_type, code, "request failed");
        }

        match respond(header, result, self.options.dump_chunk) {
            Ok(datagrams) => datagrams,
            Err(e) => {
                tracing::warn!(error = ?e, "failed to encode reply");
                Vec::new()
            }
        }
    }

    fn find(&self, name: &str) -> KernelResult<usize> {
        self.sets.iter().position(|set| set.name == name).ok_or(Errno::ENOENT as i32)
    }

    fn dispatch(&mut self, request: &Message) -> KernelResult<Reply> {
        let Some(cmd) = request.command() else {
            return Err(Errno::EOPNOTSUPP as i32);
        };
        if request.header.flags & NLM_F_REQUEST == 0 {
            return Err(Errno::EINVAL as i32);
        }

        let attrs = request.attributes();
        let protocol = find(attrs, SetAttr::Protocol)
            .and_then(|attr| attr.as_u8().ok())
            .ok_or(IPSET_ERR_PROTOCOL)?;
        if !(IPSET_PROTOCOL_MIN..=IPSET_PROTOCOL).contains(&protocol) {
            return Err(IPSET_ERR_PROTOCOL);
        }

        // The kernel treats the absence of NLM_F_EXCL as IPSET_FLAG_EXIST.
        let exist = request.header.flags & NLM_F_EXCL == 0;

        tracing::trace!(seq = request.sequence(), cmd, exist, "dispatching");

        match cmd {
            IPSET_CMD_PROTOCOL => Ok(Reply::Data(vec![
                Nla::u8(SetAttr::Protocol, IPSET_PROTOCOL),
                Nla::u8(SetAttr::ProtocolMin, IPSET_PROTOCOL_MIN),
            ])),
            IPSET_CMD_CREATE => self.create(attrs, exist),
            IPSET_CMD_DESTROY => self.destroy(attrs),
            IPSET_CMD_FLUSH => self.flush(attrs),
            IPSET_CMD_RENAME => self.rename(attrs),
            IPSET_CMD_SWAP => self.swap(attrs),
            IPSET_CMD_LIST | IPSET_CMD_SAVE => self.list(attrs, protocol),
            IPSET_CMD_ADD | IPSET_CMD_DEL | IPSET_CMD_TEST => self.adt(cmd, attrs, exist),
            IPSET_CMD_HEADER => self.header(attrs, protocol),
            IPSET_CMD_TYPE => self.type_query(attrs, protocol),
            _ => Err(Errno::EOPNOTSUPP as i32),
        }
    }

    fn create(&mut self, attrs: &[Nla], exist: bool) -> KernelResult<Reply> {
        let name = set_name(attrs, SetAttr::SetName)?;
        let type_name = string(attrs, SetAttr::TypeName)?;
        let revision = byte(attrs, SetAttr::Revision)?;
        let family = byte(attrs, SetAttr::Family)?;
        let data = nested(attrs, SetAttr::Data)?;

        if type_name != TYPE_NAME || !(REVISION_MIN..=REVISION_MAX).contains(&revision) {
            return Err(IPSET_ERR_FIND_TYPE);
        }
        if family != NFPROTO_IPV4 && family != NFPROTO_IPV6 {
            return Err(IPSET_ERR_INVALID_FAMILY);
        }

        let params = CreateParams {
            hashsize: net_u32(data, CadtAttr::HashSize)?,
            maxelem: net_u32(data, CadtAttr::MaxElem)?,
            timeout: net_u32(data, CadtAttr::Timeout)?,
            cadt_flags: net_u32(data, CadtAttr::CadtFlags)?.unwrap_or(0),
        };

        if let Ok(idx) = self.find(&name) {
            // Re-creating an identical set is fine without NLM_F_EXCL.
            if exist && self.sets[idx].same_as(family, revision, params) {
                return Ok(Reply::Ack);
            }
            return Err(Errno::EEXIST as i32);
        }
        if self.sets.len() >= self.options.max_sets {
            return Err(IPSET_ERR_MAX_SETS);
        }

        tracing::debug!(name = %name, revision, family, "created set");
        self.sets.push(HashIpSet::new(name, family, revision, params));
        Ok(Reply::Ack)
    }

    fn destroy(&mut self, attrs: &[Nla]) -> KernelResult<Reply> {
        match find(attrs, SetAttr::SetName) {
            Some(_) => {
                let idx = self.find(&set_name(attrs, SetAttr::SetName)?)?;
                self.sets.remove(idx);
            }
            None => self.sets.clear(),
        }
        Ok(Reply::Ack)
    }

    fn flush(&mut self, attrs: &[Nla]) -> KernelResult<Reply> {
        match find(attrs, SetAttr::SetName) {
            Some(_) => {
                let idx = self.find(&set_name(attrs, SetAttr::SetName)?)?;
                self.sets[idx].flush();
            }
            None => self.sets.iter_mut().for_each(HashIpSet::flush),
        }
        Ok(Reply::Ack)
    }

    fn rename(&mut self, attrs: &[Nla]) -> KernelResult<Reply> {
        let from = self.find(&set_name(attrs, SetAttr::SetName)?)?;
        let to = set_name(attrs, SetAttr::SET_NAME2)?;

        if self.find(&to).is_ok() {
            return Err(IPSET_ERR_EXIST_SETNAME2);
        }
        self.sets[from].name = to;
        Ok(Reply::Ack)
    }

    fn swap(&mut self, attrs: &[Nla]) -> KernelResult<Reply> {
        let from = self.find(&set_name(attrs, SetAttr::SetName)?)?;
        let to = self
            .find(&set_name(attrs, SetAttr::SET_NAME2)?)
            .map_err(|_| IPSET_ERR_EXIST_SETNAME2)?;

        if self.sets[from].family != self.sets[to].family {
            return Err(IPSET_ERR_TYPE_MISMATCH);
        }
        if from != to {
            let (lo, hi) = (from.min(to), from.max(to));
            let (left, right) = self.sets.split_at_mut(hi);
            left[lo].swap_contents(&mut right[0]);
        }
        Ok(Reply::Ack)
    }

    fn list(&self, attrs: &[Nla], protocol: u8) -> KernelResult<Reply> {
        let flags = net_u32(attrs, SetAttr::Flags)?.unwrap_or(0);
        let header_only = flags & IPSET_FLAG_LIST_HEADER != 0;

        let sets: Vec<&HashIpSet> = match find(attrs, SetAttr::SetName) {
            Some(_) => vec![&self.sets[self.find(&set_name(attrs, SetAttr::SetName)?)?]],
            None => self.sets.iter().collect(),
        };

        let mut parts = Vec::new();
        for set in sets {
            let mut head = self.describe(set, protocol);
            head.push(Nla::nested(SetAttr::Data, set.head(0)));

            if header_only {
                parts.push(head);
                continue;
            }

            let entries: Vec<Nla> = set.entries().map(|entry| set.entry_nla(entry)).collect();
            let mut chunks = entries.chunks(self.options.dump_chunk);

            head.push(Nla::nested(SetAttr::Adt, chunks.next().map(<[Nla]>::to_vec).unwrap_or_default()));
            parts.push(head);

            // Continuations only repeat the name.
            for chunk in chunks {
                parts.push(vec![
                    Nla::u8(SetAttr::Protocol, protocol),
                    Nla::string(SetAttr::SetName, &set.name),
                    Nla::nested(SetAttr::Adt, chunk.to_vec()),
                ]);
            }
        }

        Ok(Reply::Dump(parts))
    }

    fn adt(&mut self, cmd: u8, attrs: &[Nla], exist: bool) -> KernelResult<Reply> {
        let idx = self.find(&set_name(attrs, SetAttr::SetName)?)?;
        let data = nested(attrs, SetAttr::Data)?;
        let set = &mut self.sets[idx];

        let addr = address(data, set.family)?;

        match cmd {
            IPSET_CMD_ADD => {
                let mut entry = Entry::new(addr);
                entry.timeout = net_u32(data, AdtAttr::Timeout)?;
                if entry.timeout.is_some() && !set.has_timeout() {
                    return Err(IPSET_ERR_TIMEOUT);
                }
                if let Some(comment) = find(data, AdtAttr::Comment) {
                    if !set.has_comment() {
                        return Err(IPSET_ERR_COMMENT);
                    }
                    entry.comment = Some(comment.as_string().map_err(|_| IPSET_ERR_PROTOCOL)?);
                }
                set.add(entry, exist)?;
            }
            IPSET_CMD_DEL => set.delete(&addr, exist)?,
            _ => {
                if !set.contains(&addr) {
                    return Err(IPSET_ERR_EXIST);
                }
            }
        }

        Ok(Reply::Ack)
    }

    fn header(&self, attrs: &[Nla], protocol: u8) -> KernelResult<Reply> {
        let idx = self.find(&set_name(attrs, SetAttr::SetName)?)?;
        Ok(Reply::Data(self.describe(&self.sets[idx], protocol)))
    }

    fn type_query(&self, attrs: &[Nla], protocol: u8) -> KernelResult<Reply> {
        let type_name = string(attrs, SetAttr::TypeName)?;
        let family = byte(attrs, SetAttr::Family)?;

        if type_name != TYPE_NAME {
            return Err(IPSET_ERR_FIND_TYPE);
        }
        if ![NFPROTO_UNSPEC, NFPROTO_IPV4, NFPROTO_IPV6].contains(&family) {
            return Err(IPSET_ERR_INVALID_FAMILY);
        }

        Ok(Reply::Data(vec![
            Nla::u8(SetAttr::Protocol, protocol),
            Nla::string(SetAttr::TypeName, TYPE_NAME),
            Nla::u8(SetAttr::Family, family),
            Nla::u8(SetAttr::Revision, REVISION_MAX),
            Nla::u8(SetAttr::REVISION_MIN, REVISION_MIN),
        ]))
    }

    fn describe(&self, set: &HashIpSet, protocol: u8) -> Vec<Nla> {
        vec![
            Nla::u8(SetAttr::Protocol, protocol),
            Nla::string(SetAttr::SetName, &set.name),
            Nla::string(SetAttr::TypeName, TYPE_NAME),
            Nla::u8(SetAttr::Family, set.family),
            Nla::u8(SetAttr::Revision, set.revision),
        ]
    }
}

/// Encodes the outcome of a request.
fn respond(
    request: Header,
    result: KernelResult<Reply>,
    dump_chunk: usize,
) -> Result<Vec<Bytes>, message::Error> {
    let reply_type = request.message_type;
    let seq = request.sequence;
    let mut datagrams = Vec::new();

    match result {
        Err(code) => {
            // Errors are reported whether or not an ack was requested.
            datagrams.push(wrap_all(&[Message::error(-code, request)])?);
            return Ok(datagrams);
        }
        Ok(Reply::Dump(parts)) => {
            let mut messages: Vec<Message> = parts
                .into_iter()
                .map(|attrs| Message::set(reply_type, NLM_F_MULTI, seq, GenMsg::default(), attrs))
                .collect();
            messages.push(Message::done(seq));

            // The last part shares its datagram with NLMSG_DONE.
            let tail = messages.split_off(messages.len().saturating_sub(2));
            for msg in messages {
                datagrams.push(wrap_all(&[msg])?);
            }
            datagrams.push(wrap_all(&tail)?);

            tracing::trace!(seq, datagrams = datagrams.len(), dump_chunk, "dump reply");
            return Ok(datagrams);
        }
        Ok(Reply::Data(attrs)) => {
            let msg = Message::set(reply_type, 0, seq, GenMsg::default(), attrs);
            datagrams.push(wrap_all(&[msg])?);
        }
        Ok(Reply::Ack) => {}
    }

    if request.flags & NLM_F_ACK != 0 {
        datagrams.push(wrap_all(&[Message::error(0, request)])?);
    }

    Ok(datagrams)
}

fn string(attrs: &[Nla], kind: SetAttr) -> KernelResult<String> {
    find(attrs, kind).ok_or(IPSET_ERR_PROTOCOL)?.as_string().map_err(|_| IPSET_ERR_PROTOCOL)
}

fn set_name(attrs: &[Nla], kind: SetAttr) -> KernelResult<String> {
    let name = string(attrs, kind)?;
    if name.len() >= IPSET_MAXNAMELEN {
        return Err(Errno::EINVAL as i32);
    }
    Ok(name)
}

fn byte(attrs: &[Nla], kind: SetAttr) -> KernelResult<u8> {
    find(attrs, kind).ok_or(IPSET_ERR_PROTOCOL)?.as_u8().map_err(|_| IPSET_ERR_PROTOCOL)
}

fn nested(attrs: &[Nla], kind: SetAttr) -> KernelResult<&[Nla]> {
    find(attrs, kind).ok_or(IPSET_ERR_PROTOCOL)?.children().map_err(|_| IPSET_ERR_PROTOCOL)
}

/// An optional 32-bit attribute, which must be flagged as network byte order.
fn net_u32(attrs: &[Nla], kind: impl Into<u16>) -> KernelResult<Option<u32>> {
    match find(attrs, kind) {
        None => Ok(None),
        Some(attr) if !attr.is_net_byteorder() => Err(IPSET_ERR_PROTOCOL),
        Some(attr) => attr.as_u32_be().map(Some).map_err(|_| IPSET_ERR_PROTOCOL),
    }
}

/// The address of an entry, which must match the family of the set.
fn address(data: &[Nla], family: u8) -> KernelResult<IpAddr> {
    let container = find(data, AdtAttr::Ip).ok_or(IPSET_ERR_PROTOCOL)?;
    let children = container.children().map_err(|_| IPSET_ERR_PROTOCOL)?;

    let (kind, missing) = match family {
        NFPROTO_IPV6 => (IpAttr::Ipv6, IPSET_ERR_IPADDR_IPV6),
        _ => (IpAttr::Ipv4, IPSET_ERR_IPADDR_IPV4),
    };
    if find(children, kind).is_none() {
        return Err(missing);
    }

    container.as_ip().map_err(|_| missing)
}

//! Decoding of list replies.
//!
//! A listing arrives as a sequence of messages. The first message of a set
//! carries its type, family, revision and a `DATA` block describing it. When
//! the entries do not fit in one message, the kernel continues in further
//! messages that repeat only the set name, followed by more `ADT` entries.

use std::net::IpAddr;

use ipset_wire::{
    constants::{IPSET_FLAG_WITH_COMMENT, IPSET_FLAG_WITH_COUNTERS, IPSET_FLAG_WITH_FORCEADD},
    nla::{find, find_all},
    AdtAttr, CadtAttr, Message, Nla, SetAttr,
};

use crate::{Family, SetError};

/// A member of a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEntry {
    pub address: IpAddr,
    /// `None` unless the set keeps counters.
    pub packets: Option<u64>,
    /// `None` unless the set keeps counters.
    pub bytes: Option<u64>,
    pub comment: Option<String>,
    /// Remaining lifetime in seconds, for sets with timeouts.
    pub timeout: Option<u32>,
}

/// The `DATA` block of a set as the kernel reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetHeader {
    pub hashsize: Option<u32>,
    pub maxelem: Option<u32>,
    pub timeout: Option<u32>,
    pub references: Option<u32>,
    pub elements: Option<u32>,
    pub memsize: Option<u32>,
    pub counters: bool,
    pub comment: bool,
    pub forceadd: bool,
}

impl SetHeader {
    fn parse(data: &[Nla]) -> Result<Self, SetError> {
        let u32_of = |kind: CadtAttr| find(data, kind).map(Nla::as_u32_be).transpose();
        let flags = u32_of(CadtAttr::CadtFlags)?.unwrap_or(0);

        Ok(Self {
            hashsize: u32_of(CadtAttr::HashSize)?,
            maxelem: u32_of(CadtAttr::MaxElem)?,
            timeout: u32_of(CadtAttr::Timeout)?,
            references: u32_of(CadtAttr::References)?,
            elements: u32_of(CadtAttr::Elements)?,
            memsize: u32_of(CadtAttr::MemSize)?,
            counters: flags & IPSET_FLAG_WITH_COUNTERS != 0,
            comment: flags & IPSET_FLAG_WITH_COMMENT != 0,
            forceadd: flags & IPSET_FLAG_WITH_FORCEADD != 0,
        })
    }
}

/// A set, without its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDescriptor {
    pub name: String,
    pub type_name: String,
    pub family: Family,
    pub revision: u8,
    pub header: SetHeader,
}

impl SetDescriptor {
    /// Parses the set-level attributes of a message. Returns `None` for
    /// continuation messages, which only repeat the name.
    fn parse(attrs: &[Nla]) -> Result<Option<Self>, SetError> {
        let name = required(attrs, SetAttr::SetName)?.as_string()?;
        let Some(type_name) = find(attrs, SetAttr::TypeName) else {
            return Ok(None);
        };

        let raw_family = required(attrs, SetAttr::Family)?.as_u8()?;
        let family = Family::from_raw(raw_family)
            .ok_or_else(|| SetError::MalformedMessage(format!("unknown family {raw_family}")))?;

        let header = match find(attrs, SetAttr::Data) {
            Some(data) => SetHeader::parse(data.children()?)?,
            None => SetHeader::default(),
        };

        Ok(Some(Self {
            name,
            type_name: type_name.as_string()?,
            family,
            revision: required(attrs, SetAttr::Revision)?.as_u8()?,
            header,
        }))
    }
}

/// The result of a list command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// The entries of a single set.
    Entries(Vec<SetEntry>),
    /// Every set, without entries.
    Sets(Vec<SetDescriptor>),
}

fn required(attrs: &[Nla], kind: SetAttr) -> Result<&Nla, SetError> {
    find(attrs, kind)
        .ok_or_else(|| SetError::MalformedMessage(format!("missing attribute {kind:?}")))
}

fn parse_entry(group: &[Nla]) -> Result<SetEntry, SetError> {
    let address = find(group, AdtAttr::Ip)
        .ok_or_else(|| SetError::MalformedMessage("entry without address".to_string()))?
        .as_ip()?;

    Ok(SetEntry {
        address,
        packets: find(group, AdtAttr::Packets).map(Nla::as_u64_be).transpose()?,
        bytes: find(group, AdtAttr::Bytes).map(Nla::as_u64_be).transpose()?,
        comment: find(group, AdtAttr::Comment).map(Nla::as_string).transpose()?,
        timeout: find(group, AdtAttr::Timeout).map(Nla::as_u32_be).transpose()?,
    })
}

/// Collects the entries of every message, in order. Unknown attributes are ignored.
pub fn parse_entries(messages: &[Message]) -> Result<Vec<SetEntry>, SetError> {
    let mut entries = Vec::new();

    for msg in messages {
        let Some(adt) = find(msg.attributes(), SetAttr::Adt) else {
            continue;
        };

        for group in find_all(adt.children()?, AdtAttr::ENTRY) {
            entries.push(parse_entry(group.children()?)?);
        }
    }

    tracing::trace!(entries = entries.len(), messages = messages.len(), "parsed entries");
    Ok(entries)
}

/// Collects set descriptors, merging consecutive messages about the same set.
pub fn parse_sets(messages: &[Message]) -> Result<Vec<SetDescriptor>, SetError> {
    let mut sets: Vec<SetDescriptor> = Vec::new();

    for msg in messages {
        let attrs = msg.attributes();
        let Some(descriptor) = SetDescriptor::parse(attrs)? else {
            // A continuation must follow the head of its set.
            let name = required(attrs, SetAttr::SetName)?.as_string()?;
            if sets.last().map_or(true, |last| last.name != name) {
                tracing::warn!(name, "continuation message without set header");
            }
            continue;
        };

        match sets.last_mut() {
            Some(last) if last.name == descriptor.name => *last = descriptor,
            _ => sets.push(descriptor),
        }
    }

    Ok(sets)
}

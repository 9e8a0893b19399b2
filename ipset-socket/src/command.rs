//! ipset commands and the attribute trees they are sent as.

use std::net::IpAddr;

use ipset_wire::{
    constants::*,
    nla::{self, find},
    AdtAttr, CadtAttr, GenMsg, Nla, SetAttr,
};

/// Address family of a set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Family {
    /// Any family, only meaningful in type queries.
    Unspec,
    #[default]
    Inet,
    Inet6,
}

impl Family {
    /// The `NFPROTO_*` value of this family.
    pub const fn to_raw(self) -> u8 {
        match self {
            Self::Unspec => NFPROTO_UNSPEC,
            Self::Inet => NFPROTO_IPV4,
            Self::Inet6 => NFPROTO_IPV6,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            NFPROTO_UNSPEC => Some(Self::Unspec),
            NFPROTO_IPV4 => Some(Self::Inet),
            NFPROTO_IPV6 => Some(Self::Inet6),
            _ => None,
        }
    }

    /// The family of an address.
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Inet,
            IpAddr::V6(_) => Self::Inet6,
        }
    }
}

/// Options for creating a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOptions {
    /// Fail if a set with the same name exists. Without it, creating an
    /// identical set again succeeds.
    pub exclusive: bool,
    /// Keep packet and byte counters per entry.
    pub counters: bool,
    /// Allow a comment per entry.
    pub comment: bool,
    /// When the set is full, evict an entry from the same hash bucket instead
    /// of rejecting the new one.
    pub forceadd: bool,
    pub maxelem: Option<u32>,
    /// Initial hash size. The kernel rounds it up to a power of two of at least 64.
    pub hashsize: Option<u32>,
    /// Default timeout of entries, in seconds. Enables per-entry timeouts.
    pub timeout: Option<u32>,
    pub type_name: String,
    pub family: Family,
    /// Type revision. Queried from the kernel when unset.
    pub revision: Option<u8>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            exclusive: true,
            counters: false,
            comment: false,
            forceadd: false,
            maxelem: None,
            hashsize: None,
            timeout: None,
            type_name: "hash:ip".to_string(),
            family: Family::Inet,
            revision: None,
        }
    }
}

impl SetOptions {
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_counters(mut self) -> Self {
        self.counters = true;
        self
    }

    pub fn with_comment(mut self) -> Self {
        self.comment = true;
        self
    }

    pub fn with_forceadd(mut self) -> Self {
        self.forceadd = true;
        self
    }

    pub fn with_maxelem(mut self, maxelem: u32) -> Self {
        self.maxelem = Some(maxelem);
        self
    }

    pub fn with_hashsize(mut self, hashsize: u32) -> Self {
        self.hashsize = Some(hashsize);
        self
    }

    pub fn with_timeout(mut self, timeout: u32) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the set type. Error mapping assumes a `hash:*` type: for other
    /// types a type-specific add failure still surfaces as
    /// [`SetError::CapacityExceeded`](crate::SetError::CapacityExceeded).
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    pub fn with_revision(mut self, revision: u8) -> Self {
        self.revision = Some(revision);
        self
    }

    fn cadt_flags(&self) -> u32 {
        let mut flags = 0;
        if self.counters {
            flags |= IPSET_FLAG_WITH_COUNTERS;
        }
        if self.comment {
            flags |= IPSET_FLAG_WITH_COMMENT;
        }
        if self.forceadd {
            flags |= IPSET_FLAG_WITH_FORCEADD;
        }
        flags
    }
}

/// Options for adding an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOptions {
    /// Fail if the entry is already present.
    pub exclusive: bool,
    /// Requires a set created with comments.
    pub comment: Option<String>,
    /// Timeout in seconds. Requires a set created with a timeout.
    pub timeout: Option<u32>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self { exclusive: true, comment: None, timeout: None }
    }
}

impl EntryOptions {
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u32) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An ipset command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { name: String, options: SetOptions, revision: u8 },
    Destroy { name: String },
    Flush { name: String },
    Rename { from: String, to: String },
    Swap { from: String, to: String },
    /// Lists one set with its entries, or every set without entries.
    List { name: Option<String> },
    Add { name: String, address: IpAddr, options: EntryOptions },
    Delete { name: String, address: IpAddr },
    Test { name: String, address: IpAddr },
    Header { name: String },
    Protocol,
    Type { type_name: String, family: Family },
}

/// A command ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The `IPSET_CMD_*` value.
    pub command: u8,
    /// Netlink flags, `NLM_F_REQUEST` excluded.
    pub flags: u16,
    pub attributes: Vec<Nla>,
}

impl Request {
    /// The netlink message type.
    pub const fn message_type(&self) -> u16 {
        ipset_msg_type(self.command)
    }

    /// The `nfgenmsg` header. ipset requests always use `NFPROTO_IPV4` here; the
    /// set family travels as an attribute.
    pub fn genmsg(&self) -> GenMsg {
        GenMsg::default()
    }

    /// Returns the first attribute of the given kind.
    pub fn attribute(&self, kind: SetAttr) -> Option<&Nla> {
        find(&self.attributes, kind)
    }
}

impl Command {
    /// The `IPSET_CMD_*` value of this command.
    pub const fn id(&self) -> u8 {
        match self {
            Self::Create { .. } => IPSET_CMD_CREATE,
            Self::Destroy { .. } => IPSET_CMD_DESTROY,
            Self::Flush { .. } => IPSET_CMD_FLUSH,
            Self::Rename { .. } => IPSET_CMD_RENAME,
            Self::Swap { .. } => IPSET_CMD_SWAP,
            Self::List { .. } => IPSET_CMD_LIST,
            Self::Add { .. } => IPSET_CMD_ADD,
            Self::Delete { .. } => IPSET_CMD_DEL,
            Self::Test { .. } => IPSET_CMD_TEST,
            Self::Header { .. } => IPSET_CMD_HEADER,
            Self::Protocol => IPSET_CMD_PROTOCOL,
            Self::Type { .. } => IPSET_CMD_TYPE,
        }
    }

    /// Builds the request for `protocol`. Fails if a name or comment holds a
    /// NUL byte.
    pub fn build(&self, protocol: u8) -> Result<Request, nla::Error> {
        let mut attributes = vec![Nla::u8(SetAttr::Protocol, protocol)];

        let flags = match self {
            Self::Create { name, options, revision } => {
                attributes.push(Nla::c_string(SetAttr::SetName, name)?);
                attributes.push(Nla::c_string(SetAttr::TypeName, &options.type_name)?);
                attributes.push(Nla::u8(SetAttr::Revision, *revision));
                attributes.push(Nla::u8(SetAttr::Family, options.family.to_raw()));

                // The kernel requires a DATA block, even an empty one.
                let mut data = Vec::new();
                if let Some(hashsize) = options.hashsize {
                    data.push(Nla::u32_be(CadtAttr::HashSize, hashsize));
                }
                if let Some(maxelem) = options.maxelem {
                    data.push(Nla::u32_be(CadtAttr::MaxElem, maxelem));
                }
                if let Some(timeout) = options.timeout {
                    data.push(Nla::u32_be(CadtAttr::Timeout, timeout));
                }
                let cadt_flags = options.cadt_flags();
                if cadt_flags != 0 {
                    data.push(Nla::u32_be(CadtAttr::CadtFlags, cadt_flags));
                }
                attributes.push(Nla::nested(SetAttr::Data, data));

                exclusive_ack(options.exclusive)
            }
            Self::Destroy { name } | Self::Flush { name } => {
                attributes.push(Nla::c_string(SetAttr::SetName, name)?);
                NLM_F_ACK
            }
            Self::Rename { from, to } | Self::Swap { from, to } => {
                attributes.push(Nla::c_string(SetAttr::SetName, from)?);
                attributes.push(Nla::c_string(SetAttr::SET_NAME2, to)?);
                NLM_F_ACK
            }
            Self::List { name: Some(name) } => {
                attributes.push(Nla::c_string(SetAttr::SetName, name)?);
                NLM_F_DUMP
            }
            Self::List { name: None } => {
                attributes.push(Nla::u32_be(SetAttr::Flags, IPSET_FLAG_LIST_HEADER));
                NLM_F_DUMP
            }
            Self::Add { name, address, options } => {
                attributes.push(Nla::c_string(SetAttr::SetName, name)?);

                let mut data = vec![Nla::ip(AdtAttr::Ip, *address)];
                if let Some(timeout) = options.timeout {
                    data.push(Nla::u32_be(AdtAttr::Timeout, timeout));
                }
                if let Some(comment) = &options.comment {
                    data.push(Nla::c_string(AdtAttr::Comment, comment)?);
                }
                attributes.push(Nla::nested(SetAttr::Data, data));

                exclusive_ack(options.exclusive)
            }
            // Without EXCL the kernel ignores deleting a missing entry.
            Self::Delete { name, address } => {
                attributes.push(Nla::c_string(SetAttr::SetName, name)?);
                attributes.push(Nla::nested(SetAttr::Data, vec![Nla::ip(AdtAttr::Ip, *address)]));
                exclusive_ack(true)
            }
            Self::Test { name, address } => {
                attributes.push(Nla::c_string(SetAttr::SetName, name)?);
                attributes.push(Nla::nested(SetAttr::Data, vec![Nla::ip(AdtAttr::Ip, *address)]));
                NLM_F_ACK
            }
            // Queries are answered by a single data message.
            Self::Header { name } => {
                attributes.push(Nla::c_string(SetAttr::SetName, name)?);
                0
            }
            Self::Protocol => 0,
            Self::Type { type_name, family } => {
                attributes.push(Nla::c_string(SetAttr::TypeName, type_name)?);
                attributes.push(Nla::u8(SetAttr::Family, family.to_raw()));
                0
            }
        };

        Ok(Request { command: self.id(), flags, attributes })
    }
}

const fn exclusive_ack(exclusive: bool) -> u16 {
    if exclusive {
        NLM_F_ACK | NLM_F_EXCL
    } else {
        NLM_F_ACK
    }
}

//! Attribute kinds of the ipset subsystem and typed value helpers.
//!
//! ipset uses several attribute tables depending on where an attribute sits in
//! the tree:
//!
//! ```text
//! command level                 SetAttr   (PROTOCOL, SETNAME, DATA, ADT, ...)
//! ├── DATA of create/header     CadtAttr  (HASHSIZE, MAXELEM, CADT_FLAGS, ...)
//! ├── DATA of add/del/test      AdtAttr   (IP, COMMENT, PACKETS, BYTES, ...)
//! └── ADT                       repeated DATA groups, one per entry (AdtAttr)
//!     └── IP                    IpAttr    (IPADDR_IPV4, IPADDR_IPV6)
//! ```
//!
//! The first 16 data kinds are shared between [`CadtAttr`] and [`AdtAttr`]; above
//! that the two tables diverge. Ids with no known meaning decode to `Unknown`.
//!
//! Integers wider than a byte are big-endian and flagged with
//! `NLA_F_NET_BYTEORDER`. Strings are NUL-terminated.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

use crate::nla::{self, Error, Nla};

macro_rules! attr_kinds {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)*
            /// A kind this crate does not know about.
            Unknown(u16),
        }

        impl From<u16> for $name {
            fn from(value: u16) -> Self {
                match value {
                    $($value => Self::$variant,)*
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<$name> for u16 {
            fn from(kind: $name) -> u16 {
                match kind {
                    $($name::$variant => $value,)*
                    $name::Unknown(other) => other,
                }
            }
        }
    };
}

attr_kinds! {
    /// Command level attributes.
    SetAttr {
        Protocol = 1,
        SetName = 2,
        /// Type name on create, second set name on swap and rename.
        TypeName = 3,
        Revision = 4,
        Family = 5,
        Flags = 6,
        Data = 7,
        Adt = 8,
        LineNo = 9,
        /// Minimal protocol on `PROTOCOL` replies, minimal revision on `TYPE`.
        ProtocolMin = 10,
        Index = 11,
    }
}

impl SetAttr {
    /// Second set name, sharing the id of [`SetAttr::TypeName`].
    pub const SET_NAME2: Self = Self::TypeName;
    /// Minimal type revision, sharing the id of [`SetAttr::ProtocolMin`].
    pub const REVISION_MIN: Self = Self::ProtocolMin;
}

attr_kinds! {
    /// Attributes of the `DATA` block describing a whole set.
    CadtAttr {
        Ip = 1,
        IpTo = 2,
        Cidr = 3,
        Port = 4,
        PortTo = 5,
        Timeout = 6,
        Proto = 7,
        CadtFlags = 8,
        LineNo = 9,
        Mark = 10,
        MarkMask = 11,
        Gc = 17,
        HashSize = 18,
        MaxElem = 19,
        Netmask = 20,
        BucketSize = 21,
        Resize = 22,
        Size = 23,
        Elements = 24,
        References = 25,
        MemSize = 26,
    }
}

attr_kinds! {
    /// Attributes of a single set entry.
    AdtAttr {
        Ip = 1,
        IpTo = 2,
        Cidr = 3,
        Port = 4,
        PortTo = 5,
        Timeout = 6,
        Proto = 7,
        CadtFlags = 8,
        LineNo = 9,
        Mark = 10,
        MarkMask = 11,
        Ether = 17,
        Name = 18,
        NameRef = 19,
        Ip2 = 20,
        Cidr2 = 21,
        Ip2To = 22,
        Iface = 23,
        Bytes = 24,
        Packets = 25,
        Comment = 26,
        SkbMark = 27,
        SkbPrio = 28,
        SkbQueue = 29,
        Pad = 30,
    }
}

impl AdtAttr {
    /// Kind of each entry group inside an `ADT` container.
    pub const ENTRY: u16 = 7;
}

attr_kinds! {
    /// Attributes of an address container (`IP`, `IP_TO`, `IP2`).
    IpAttr {
        Ipv4 = 1,
        Ipv6 = 2,
    }
}

// Constructors

impl Nla {
    pub fn u8(kind: impl Into<u16>, value: u8) -> Self {
        Self::bytes(kind, vec![value])
    }

    pub fn u16_be(kind: impl Into<u16>, value: u16) -> Self {
        Self::bytes(kind, value.to_be_bytes().to_vec()).with_net_byteorder()
    }

    pub fn u32_be(kind: impl Into<u16>, value: u32) -> Self {
        Self::bytes(kind, value.to_be_bytes().to_vec()).with_net_byteorder()
    }

    pub fn u64_be(kind: impl Into<u16>, value: u64) -> Self {
        Self::bytes(kind, value.to_be_bytes().to_vec()).with_net_byteorder()
    }

    /// A NUL-terminated string.
    pub fn string(kind: impl Into<u16>, value: &str) -> Self {
        let mut buf = BytesMut::with_capacity(value.len() + 1);
        buf.put_slice(value.as_bytes());
        buf.put_u8(0);
        Self::bytes(kind, buf.freeze())
    }

    /// A NUL-terminated string that must survive [`Nla::as_string`] unchanged.
    /// Fails on an interior NUL, which the kernel would truncate at.
    pub fn c_string(kind: impl Into<u16>, value: &str) -> Result<Self, Error> {
        let kind = kind.into();
        if value.contains('\0') {
            return Err(Error::InvalidString { kind });
        }
        Ok(Self::string(kind, value))
    }

    /// An address container holding a single `IPADDR_IPV4` or `IPADDR_IPV6`.
    pub fn ip(kind: impl Into<u16>, addr: IpAddr) -> Self {
        let inner = match addr {
            IpAddr::V4(v4) => Self::bytes(IpAttr::Ipv4, v4.octets().to_vec()),
            IpAddr::V6(v6) => Self::bytes(IpAttr::Ipv6, v6.octets().to_vec()),
        };
        Self::nested(kind, vec![inner.with_net_byteorder()])
    }
}

// Accessors

impl Nla {
    fn fixed<const N: usize>(&self, expected: &'static str) -> Result<[u8; N], Error> {
        let payload = self
            .payload()
            .ok_or(Error::Payload { kind: self.kind(), expected, actual: self.value_len() })?;

        <[u8; N]>::try_from(payload.as_ref()).map_err(|_| Error::Payload {
            kind: self.kind(),
            expected,
            actual: payload.len(),
        })
    }

    pub fn as_u8(&self) -> Result<u8, Error> {
        self.fixed::<1>("u8").map(|[b]| b)
    }

    pub fn as_u16_be(&self) -> Result<u16, Error> {
        self.fixed("u16").map(u16::from_be_bytes)
    }

    pub fn as_u32_be(&self) -> Result<u32, Error> {
        self.fixed("u32").map(u32::from_be_bytes)
    }

    pub fn as_u64_be(&self) -> Result<u64, Error> {
        self.fixed("u64").map(u64::from_be_bytes)
    }

    /// Reads a string, dropping the NUL terminator and anything after it.
    pub fn as_string(&self) -> Result<String, Error> {
        let payload = self.payload().ok_or(Error::InvalidString { kind: self.kind() })?;
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());

        std::str::from_utf8(&payload[..end])
            .map(str::to_owned)
            .map_err(|_| Error::InvalidString { kind: self.kind() })
    }

    /// Reads an address container.
    pub fn as_ip(&self) -> Result<IpAddr, Error> {
        let children = self.children()?;

        if let Some(v4) = nla::find(children, IpAttr::Ipv4) {
            return v4.fixed::<4>("IPv4 address").map(|o| IpAddr::V4(Ipv4Addr::from(o)));
        }
        if let Some(v6) = nla::find(children, IpAttr::Ipv6) {
            return v6.fixed::<16>("IPv6 address").map(|o| IpAddr::V6(Ipv6Addr::from(o)));
        }

        Err(Error::Missing { kind: u16::from(IpAttr::Ipv4), context: "address container" })
    }
}

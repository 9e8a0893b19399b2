//! The `hash:ip` set type.

use std::{
    hash::{Hash, Hasher},
    mem,
    net::IpAddr,
};

use rustc_hash::FxHasher;

use ipset_wire::{
    constants::{
        IPSET_DEFAULT_HASHSIZE, IPSET_DEFAULT_MAXELEM, IPSET_ERR_EXIST, IPSET_ERR_HASH_FULL,
        IPSET_FLAG_WITH_COMMENT, IPSET_FLAG_WITH_COUNTERS, IPSET_FLAG_WITH_FORCEADD,
        IPSET_MIMINAL_HASHSIZE,
    },
    AdtAttr, CadtAttr, Nla,
};

pub(crate) const TYPE_NAME: &str = "hash:ip";
pub(crate) const REVISION_MIN: u8 = 0;
pub(crate) const REVISION_MAX: u8 = 6;

/// Creation parameters, as read from the `DATA` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CreateParams {
    pub(crate) hashsize: Option<u32>,
    pub(crate) maxelem: Option<u32>,
    pub(crate) timeout: Option<u32>,
    pub(crate) cadt_flags: u32,
}

/// splitmix64 finalizer. Fx leaves the low bits of similar addresses equal,
/// which would put them all in one bucket.
const fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) addr: IpAddr,
    pub(crate) timeout: Option<u32>,
    pub(crate) comment: Option<String>,
    pub(crate) packets: u64,
    pub(crate) bytes: u64,
}

impl Entry {
    pub(crate) fn new(addr: IpAddr) -> Self {
        Self { addr, timeout: None, comment: None, packets: 0, bytes: 0 }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HashIpSet {
    pub(crate) name: String,
    pub(crate) family: u8,
    pub(crate) revision: u8,
    hashsize: u32,
    maxelem: u32,
    timeout: Option<u32>,
    cadt_flags: u32,
    buckets: Vec<Vec<Entry>>,
    elements: usize,
}

impl HashIpSet {
    pub(crate) fn new(name: String, family: u8, revision: u8, params: CreateParams) -> Self {
        // Rounded up to a power of two, never below the minimum.
        let hashsize = params
            .hashsize
            .unwrap_or(IPSET_DEFAULT_HASHSIZE)
            .max(IPSET_MIMINAL_HASHSIZE)
            .next_power_of_two();

        Self {
            name,
            family,
            revision,
            hashsize,
            maxelem: params.maxelem.unwrap_or(IPSET_DEFAULT_MAXELEM),
            timeout: params.timeout,
            cadt_flags: params.cadt_flags
                & (IPSET_FLAG_WITH_COUNTERS | IPSET_FLAG_WITH_COMMENT | IPSET_FLAG_WITH_FORCEADD),
            buckets: vec![Vec::new(); hashsize as usize],
            elements: 0,
        }
    }

    /// Whether a set created with these parameters would be identical to this one.
    pub(crate) fn same_as(&self, family: u8, revision: u8, params: CreateParams) -> bool {
        let other = Self::new(String::new(), family, revision, params);
        self.family == other.family
            && self.revision == other.revision
            && self.hashsize == other.hashsize
            && self.maxelem == other.maxelem
            && self.timeout == other.timeout
            && self.cadt_flags == other.cadt_flags
    }

    pub(crate) fn has_timeout(&self) -> bool {
        self.timeout.is_some()
    }

    pub(crate) fn has_comment(&self) -> bool {
        self.cadt_flags & IPSET_FLAG_WITH_COMMENT != 0
    }

    fn has_counters(&self) -> bool {
        self.cadt_flags & IPSET_FLAG_WITH_COUNTERS != 0
    }

    fn has_forceadd(&self) -> bool {
        self.cadt_flags & IPSET_FLAG_WITH_FORCEADD != 0
    }

    pub(crate) fn len(&self) -> usize {
        self.elements
    }

    fn bucket(&self, addr: &IpAddr) -> usize {
        let mut hasher = FxHasher::default();
        addr.hash(&mut hasher);
        (mix(hasher.finish()) % self.buckets.len() as u64) as usize
    }

    fn position(&self, addr: &IpAddr) -> (usize, Option<usize>) {
        let bucket = self.bucket(addr);
        (bucket, self.buckets[bucket].iter().position(|e| e.addr == *addr))
    }

    /// Adds an entry. With `exist`, an entry already present is updated instead
    /// of rejected.
    pub(crate) fn add(&mut self, mut entry: Entry, exist: bool) -> Result<(), i32> {
        if entry.timeout.is_none() {
            entry.timeout = self.timeout;
        }

        let (bucket, found) = self.position(&entry.addr);
        if let Some(idx) = found {
            if !exist {
                return Err(IPSET_ERR_EXIST);
            }
            let current = &mut self.buckets[bucket][idx];
            current.timeout = entry.timeout;
            current.comment = entry.comment;
            return Ok(());
        }

        if self.elements >= self.maxelem as usize {
            if !self.has_forceadd() || self.buckets[bucket].is_empty() {
                return Err(IPSET_ERR_HASH_FULL);
            }
            let evicted = self.buckets[bucket].remove(0);
            tracing::trace!(set = %self.name, evicted = %evicted.addr, added = %entry.addr, "forceadd eviction");
            self.elements -= 1;
        }

        self.buckets[bucket].push(entry);
        self.elements += 1;
        Ok(())
    }

    /// Removes an entry. With `exist`, removing a missing entry succeeds.
    pub(crate) fn delete(&mut self, addr: &IpAddr, exist: bool) -> Result<(), i32> {
        match self.position(addr) {
            (bucket, Some(idx)) => {
                self.buckets[bucket].remove(idx);
                self.elements -= 1;
                Ok(())
            }
            (_, None) if exist => Ok(()),
            (_, None) => Err(IPSET_ERR_EXIST),
        }
    }

    pub(crate) fn contains(&self, addr: &IpAddr) -> bool {
        self.position(addr).1.is_some()
    }

    pub(crate) fn flush(&mut self) {
        self.buckets.iter_mut().for_each(Vec::clear);
        self.elements = 0;
    }

    /// Entries in hash table order.
    pub(crate) fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.buckets.iter().flatten()
    }

    /// The `DATA` block describing the set.
    pub(crate) fn head(&self, references: u32) -> Vec<Nla> {
        let memsize = mem::size_of::<Self>()
            + self.buckets.len() * mem::size_of::<Vec<Entry>>()
            + self.elements * mem::size_of::<Entry>();

        let mut data = vec![
            Nla::u32_be(CadtAttr::HashSize, self.hashsize),
            Nla::u32_be(CadtAttr::MaxElem, self.maxelem),
        ];
        if let Some(timeout) = self.timeout {
            data.push(Nla::u32_be(CadtAttr::Timeout, timeout));
        }
        if self.cadt_flags != 0 {
            data.push(Nla::u32_be(CadtAttr::CadtFlags, self.cadt_flags));
        }
        data.push(Nla::u32_be(CadtAttr::References, references));
        data.push(Nla::u32_be(CadtAttr::Elements, self.elements as u32));
        data.push(Nla::u32_be(CadtAttr::MemSize, memsize as u32));
        data
    }

    /// One entry group of an `ADT` block.
    pub(crate) fn entry_nla(&self, entry: &Entry) -> Nla {
        let mut attrs = vec![Nla::ip(AdtAttr::Ip, entry.addr)];
        if let Some(timeout) = entry.timeout {
            attrs.push(Nla::u32_be(AdtAttr::Timeout, timeout));
        }
        if self.has_counters() {
            attrs.push(Nla::u64_be(AdtAttr::Bytes, entry.bytes));
            attrs.push(Nla::u64_be(AdtAttr::Packets, entry.packets));
        }
        if let Some(comment) = &entry.comment {
            attrs.push(Nla::string(AdtAttr::Comment, comment));
        }
        Nla::nested(AdtAttr::ENTRY, attrs)
    }

    /// Exchanges everything but the name with `other`.
    pub(crate) fn swap_contents(&mut self, other: &mut Self) {
        mem::swap(self, other);
        mem::swap(&mut self.name, &mut other.name);
    }
}

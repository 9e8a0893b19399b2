//! Request correlation and set management on top of [`ipset_transport`].
//!
//! [`ReqSocket`] sends netlink requests and gathers their replies. [`IpSet`]
//! builds ipset commands on top of it and decodes the replies into domain types.

mod command;
mod dump;
mod error;
mod req;
mod session;

pub use command::{Command, EntryOptions, Family, Request, SetOptions};
pub use dump::{parse_entries, parse_sets, Listing, SetDescriptor, SetEntry, SetHeader};
pub use error::SetError;
pub use req::*;
pub use session::IpSet;

/// Netlink sequence numbers. Wraps on overflow and never yields 0, which the
/// kernel uses for unsolicited messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber(u32);

impl Default for SequenceNumber {
    fn default() -> Self {
        Self(1)
    }
}

impl SequenceNumber {
    pub fn new(id: u32) -> Self {
        Self(id.max(1))
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    /// Returns the current number and advances to the next one.
    pub fn advance(&mut self) -> u32 {
        let id = self.0;
        self.0 = match id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }
}

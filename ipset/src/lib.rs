//! A client for the Linux ipset subsystem.
//!
//! ```no_run
//! # #[cfg(target_os = "linux")]
//! # fn main() -> Result<(), ipset::SetError> {
//! use ipset::{EntryOptions, IpSet, SetOptions};
//!
//! let mut ipset = IpSet::open()?;
//! ipset.create("blocklist", &SetOptions::default().with_counters())?;
//! ipset.add("blocklist", "192.0.2.1".parse().unwrap(), &EntryOptions::default())?;
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "linux"))]
//! # fn main() {}
//! ```

pub use ipset_socket::*;
pub use ipset_transport::*;
pub use ipset_wire::{attr, constants, message, nla};

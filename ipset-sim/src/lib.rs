//! An in-memory ipset kernel.
//!
//! [`SimKernel`] answers netlink requests the way the kernel's ipset subsystem
//! does for `hash:ip` sets, including its error numbers and the way it splits
//! listings across messages. [`SimTransport`] connects a client to it and can
//! inject the faults a real socket produces: interrupted reads, lost and late
//! replies, and messages meant for other requests.

mod kernel;
pub use kernel::{Kernel, SimOptions};

mod set;

mod transport;
pub use transport::{FaultInjector, SimKernel, SimTransport};

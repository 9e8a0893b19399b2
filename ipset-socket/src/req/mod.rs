use std::time::Duration;

use thiserror::Error;

use ipset_wire::{constants::IPSET_PROTOCOL_MIN, message};

mod socket;
mod state;
mod stats;
pub use socket::*;
pub use stats::ReqStats;

#[derive(Debug, Error)]
pub enum ReqError {
    #[error("Transport error: {0:?}")]
    Transport(#[from] std::io::Error),
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] message::Error),
    #[error("Kernel returned error {0}")]
    Kernel(i32),
    #[error("Kernel dropped messages (receive buffer overrun)")]
    Overrun,
    #[error("Socket closed")]
    SocketClosed,
    #[error("Request timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ReqOptions {
    /// How long a request may wait for its final reply.
    pub timeout: Duration,
    /// The ipset protocol revision sent with every request.
    pub protocol: u8,
}

impl ReqOptions {
    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the protocol revision sent with every request.
    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }
}

impl Default for ReqOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5), protocol: IPSET_PROTOCOL_MIN }
    }
}

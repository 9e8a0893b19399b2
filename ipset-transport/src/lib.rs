//! Datagram transports for the ipset client.
//!
//! A [`Transport`] moves whole netlink datagrams. It knows nothing about message
//! framing or sequence numbers, so the correlation logic above it can run
//! against an in-memory kernel.

use std::{io, time::Duration};

use bytes::Bytes;

#[cfg(target_os = "linux")]
mod netlink;
#[cfg(target_os = "linux")]
pub use netlink::NetlinkSocket;

/// A blocking, datagram oriented transport to the kernel.
///
/// # Errors
/// Implementations report failures as [`io::Error`]s. Callers interpret the
/// kinds as follows:
/// - [`io::ErrorKind::Interrupted`]: retried immediately.
/// - [`io::ErrorKind::WouldBlock`] and [`io::ErrorKind::TimedOut`]: nothing
///   arrived within the timeout.
/// - anything else is fatal for the request in flight.
pub trait Transport {
    /// Sends one datagram.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Receives one datagram, waiting at most `timeout`.
    fn recv(&mut self, timeout: Duration) -> io::Result<Bytes>;

    /// Releases the underlying resources. Further calls fail.
    fn close(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).send(buf)
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Bytes> {
        (**self).recv(timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).send(buf)
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Bytes> {
        (**self).recv(timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// The error transports return once closed.
pub fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}

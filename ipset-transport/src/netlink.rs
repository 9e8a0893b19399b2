use std::{
    io,
    os::fd::{AsRawFd, OwnedFd},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use nix::sys::{
    socket::{
        bind, getsockname, recv, sendto, setsockopt, socket, sockopt, AddressFamily, MsgFlags,
        NetlinkAddr, SockFlag, SockProtocol, SockType,
    },
    time::{TimeVal, TimeValLike},
};

use crate::{closed, Transport};

/// Default receive buffer size. Large enough for any ipset dump chunk.
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// A `NETLINK_NETFILTER` socket talking to the kernel.
#[derive(Debug)]
pub struct NetlinkSocket {
    fd: Option<OwnedFd>,
    /// Port id assigned by the kernel on bind.
    port: u32,
    buffer_size: usize,
}

impl NetlinkSocket {
    /// Opens and binds a socket with the default receive buffer size.
    pub fn open() -> io::Result<Self> {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Opens and binds a socket that receives datagrams of up to `buffer_size` bytes.
    pub fn with_buffer_size(buffer_size: usize) -> io::Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkNetFilter,
        )?;

        // Port 0 lets the kernel pick a unique port id.
        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, 0))?;
        // SO_RCVBUF stays at the system default; `buffer_size` only bounds a
        // single datagram.
        let port = getsockname::<NetlinkAddr>(fd.as_raw_fd())?.pid();

        tracing::debug!(port, buffer_size, "opened netlink socket");

        Ok(Self { fd: Some(fd), port, buffer_size })
    }

    /// The port id the kernel assigned to this socket.
    pub fn port(&self) -> u32 {
        self.port
    }

    fn fd(&self) -> io::Result<&OwnedFd> {
        self.fd.as_ref().ok_or_else(closed)
    }
}

impl Transport for NetlinkSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        let fd = self.fd()?;
        let sent = sendto(fd.as_raw_fd(), buf, &NetlinkAddr::new(0, 0), MsgFlags::empty())?;
        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short netlink write: {sent} of {} bytes", buf.len()),
            ));
        }

        tracing::trace!(len = sent, "sent datagram");
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Bytes> {
        let fd = self.fd()?;

        // A zero timeout would block forever.
        let micros = timeout.as_micros().clamp(1, i64::MAX as u128) as i64;
        setsockopt(fd, sockopt::ReceiveTimeout, &TimeVal::microseconds(micros))?;

        let mut buf = BytesMut::zeroed(self.buffer_size);
        // With MSG_TRUNC the kernel reports the real datagram length.
        let len = recv(fd.as_raw_fd(), &mut buf, MsgFlags::MSG_TRUNC)?;
        if len > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("datagram of {len} bytes exceeds receive buffer of {}", buf.len()),
            ));
        }

        buf.truncate(len);
        tracing::trace!(len, "received datagram");

        Ok(buf.freeze())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.fd.take().is_some() {
            tracing::debug!(port = self.port, "closed netlink socket");
        }

        Ok(())
    }
}

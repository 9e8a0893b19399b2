use std::{collections::VecDeque, io, net::IpAddr, sync::Arc, thread, time::Duration};

use bytes::Bytes;
use nix::errno::Errno;
use parking_lot::Mutex;

use ipset_transport::{closed, Transport};
use ipset_wire::{
    message::{self, wrap_all},
    Header, Message,
};

use crate::{Kernel, SimOptions};

/// A handle to a shared in-memory kernel. Clones refer to the same kernel.
#[derive(Debug, Clone, Default)]
pub struct SimKernel {
    inner: Arc<Mutex<Kernel>>,
}

impl SimKernel {
    pub fn new(options: SimOptions) -> Self {
        Self { inner: Arc::new(Mutex::new(Kernel::new(options))) }
    }

    /// Opens a new transport to this kernel.
    pub fn connect(&self) -> SimTransport {
        SimTransport {
            kernel: self.clone(),
            faults: Arc::default(),
            inbox: VecDeque::new(),
            held: Vec::new(),
            closed: false,
        }
    }

    pub fn set_names(&self) -> Vec<String> {
        self.inner.lock().set_names()
    }

    pub fn entry_count(&self, name: &str) -> Option<usize> {
        self.inner.lock().entry_count(name)
    }

    pub fn contains(&self, name: &str, addr: &IpAddr) -> bool {
        self.inner.lock().contains(name, addr)
    }
}

#[derive(Debug, Default)]
struct Faults {
    interrupts: usize,
    strays: usize,
    muted: bool,
    holding: bool,
}

/// Controls the faults a [`SimTransport`] injects. Obtained with
/// [`SimTransport::faults`], and usable after the transport has been moved
/// into a client.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    faults: Arc<Mutex<Faults>>,
}

impl FaultInjector {
    /// Fails the next `n` receives with [`io::ErrorKind::Interrupted`].
    pub fn interrupt(&self, n: usize) {
        self.faults.lock().interrupts = n;
    }

    /// Delivers `n` error messages with an unrelated sequence number ahead of
    /// the replies to the next request.
    pub fn inject_strays(&self, n: usize) {
        self.faults.lock().strays = n;
    }

    /// Drops every reply while set.
    pub fn mute(&self, muted: bool) {
        self.faults.lock().muted = muted;
    }

    /// Holds replies back while set. Held replies are delivered ahead of the
    /// replies to the first request sent after the hold is lifted.
    pub fn hold_replies(&self, holding: bool) {
        self.faults.lock().holding = holding;
    }
}

/// A [`Transport`] connected to a [`SimKernel`].
#[derive(Debug)]
pub struct SimTransport {
    kernel: SimKernel,
    faults: Arc<Mutex<Faults>>,
    inbox: VecDeque<Bytes>,
    held: Vec<Bytes>,
    closed: bool,
}

impl SimTransport {
    pub fn faults(&self) -> FaultInjector {
        FaultInjector { faults: Arc::clone(&self.faults) }
    }

    fn strays(request: Header, n: usize) -> io::Result<Vec<Bytes>> {
        (0..n)
            .map(|i| {
                let header = Header {
                    sequence: request.sequence.wrapping_add(0x1000 + i as u32),
                    ..request
                };
                wrap_all(&[Message::error(-(Errno::EBUSY as i32), header)]).map_err(io::Error::other)
            })
            .collect()
    }
}

impl Transport for SimTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(closed());
        }

        let replies = self.kernel.inner.lock().handle(buf);
        let mut faults = self.faults.lock();

        if faults.strays > 0 {
            if let Ok(request) = message::unwrap(buf) {
                self.inbox.extend(Self::strays(request.header, faults.strays)?);
            }
            faults.strays = 0;
        }

        if faults.muted {
            tracing::trace!(dropped = replies.len(), "muted");
            return Ok(());
        }

        if faults.holding {
            self.held.extend(replies);
        } else {
            self.inbox.extend(self.held.drain(..));
            self.inbox.extend(replies);
        }

        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Bytes> {
        if self.closed {
            return Err(closed());
        }

        {
            let mut faults = self.faults.lock();
            if faults.interrupts > 0 {
                faults.interrupts -= 1;
                return Err(io::ErrorKind::Interrupted.into());
            }
        }

        match self.inbox.pop_front() {
            Some(datagram) => Ok(datagram),
            None => {
                // Nothing will arrive until the next send.
                thread::sleep(timeout);
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.inbox.clear();
        self.held.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ipset_wire::{constants::*, GenMsg, Nla, Payload, SetAttr};

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn protocol_request(seq: u32) -> Bytes {
        message::wrap(
            ipset_msg_type(IPSET_CMD_PROTOCOL),
            NLM_F_REQUEST | NLM_F_ACK,
            seq,
            GenMsg::default(),
            vec![Nla::u8(SetAttr::Protocol, IPSET_PROTOCOL_MIN)],
        )
        .unwrap()
    }

    fn sequences(transport: &mut SimTransport) -> Vec<u32> {
        let mut seqs = Vec::new();
        while let Ok(datagram) = transport.recv(TIMEOUT) {
            seqs.extend(message::unwrap_all(&datagram).unwrap().iter().map(Message::sequence));
        }
        seqs
    }

    #[test]
    fn replies_are_queued_in_order() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut transport = SimKernel::default().connect();

        transport.send(&protocol_request(7)).unwrap();

        let reply = message::unwrap(&transport.recv(TIMEOUT).unwrap()).unwrap();
        assert_eq!(reply.sequence(), 7);
        assert!(matches!(reply.payload, Payload::Set { .. }));

        let ack = message::unwrap(&transport.recv(TIMEOUT).unwrap()).unwrap();
        assert!(matches!(ack.payload, Payload::Error(ref e) if e.is_ack()));

        assert_eq!(transport.recv(TIMEOUT).unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn faults_apply() {
        let mut transport = SimKernel::default().connect();
        let faults = transport.faults();

        faults.interrupt(2);
        assert_eq!(transport.recv(TIMEOUT).unwrap_err().kind(), io::ErrorKind::Interrupted);
        assert_eq!(transport.recv(TIMEOUT).unwrap_err().kind(), io::ErrorKind::Interrupted);
        assert_eq!(transport.recv(TIMEOUT).unwrap_err().kind(), io::ErrorKind::WouldBlock);

        faults.mute(true);
        transport.send(&protocol_request(1)).unwrap();
        assert!(sequences(&mut transport).is_empty());
        faults.mute(false);

        faults.inject_strays(1);
        transport.send(&protocol_request(2)).unwrap();
        assert_eq!(sequences(&mut transport), [2 + 0x1000, 2, 2]);
    }

    #[test]
    fn held_replies_come_first() {
        let mut transport = SimKernel::default().connect();
        let faults = transport.faults();

        faults.hold_replies(true);
        transport.send(&protocol_request(1)).unwrap();
        assert!(sequences(&mut transport).is_empty());

        faults.hold_replies(false);
        transport.send(&protocol_request(2)).unwrap();
        assert_eq!(sequences(&mut transport), [1, 1, 2, 2]);
    }

    #[test]
    fn closed_transport_fails() {
        let kernel = SimKernel::default();
        let mut transport = kernel.connect();

        transport.close().unwrap();
        assert_eq!(transport.send(&protocol_request(1)).unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert_eq!(transport.recv(TIMEOUT).unwrap_err().kind(), io::ErrorKind::NotConnected);
        // Other connections are unaffected
        kernel.connect().send(&protocol_request(1)).unwrap();
    }
}

use std::{
    collections::hash_map::Entry,
    io::ErrorKind,
    time::Instant,
};

use rustc_hash::FxHashMap;

use ipset_transport::Transport;
use ipset_wire::{
    constants::{NLM_F_ACK, NLM_F_REQUEST},
    message, GenMsg, Message, Nla,
};

use super::{state::PendingRequest, ReqError, ReqOptions, ReqStats};
use crate::SequenceNumber;

/// A netlink request socket. Sends one request at a time and gathers every
/// reply carrying its sequence number.
#[derive(Debug)]
pub struct ReqSocket<T: Transport> {
    /// The underlying transport, `None` once closed.
    transport: Option<T>,
    options: ReqOptions,
    sequence: SequenceNumber,
    /// The currently pending requests, if any. Uses [`FxHashMap`] for performance.
    pending_requests: FxHashMap<u32, PendingRequest>,
    stats: ReqStats,
}

impl<T: Transport> ReqSocket<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ReqOptions::default())
    }

    pub fn with_options(transport: T, options: ReqOptions) -> Self {
        Self {
            transport: Some(transport),
            options,
            sequence: SequenceNumber::default(),
            pending_requests: FxHashMap::default(),
            stats: ReqStats::default(),
        }
    }

    pub fn options(&self) -> &ReqOptions {
        &self.options
    }

    pub fn stats(&self) -> &ReqStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Sends a request and returns the data messages of its reply, in order.
    ///
    /// `NLM_F_REQUEST` is always set. With `NLM_F_ACK` the exchange ends at the
    /// acknowledgement; otherwise it ends at `NLMSG_DONE` or at the first
    /// single-part data message.
    pub fn request(
        &mut self,
        message_type: u16,
        flags: u16,
        genmsg: GenMsg,
        attributes: Vec<Nla>,
    ) -> Result<Vec<Message>, ReqError> {
        if self.is_closed() {
            return Err(ReqError::SocketClosed);
        }

        let sequence = self.sequence.advance();
        let flags = flags | NLM_F_REQUEST;
        let buf = message::wrap(message_type, flags, sequence, genmsg, attributes)?;

        self.pending_requests.insert(sequence, PendingRequest::new(flags & NLM_F_ACK != 0));
        tracing::debug!(seq = sequence, message_type, flags, len = buf.len(), "sending request");

        let result = self.exchange(sequence, &buf);
        // Whatever the outcome, late replies to this sequence are strays from now on.
        self.pending_requests.remove(&sequence);

        match result {
            Ok(pending) => {
                self.stats.record_answered(pending.start.elapsed());
                let messages = pending.into_messages();
                tracing::debug!(seq = sequence, replies = messages.len(), "request completed");
                Ok(messages)
            }
            Err(e) => {
                tracing::debug!(seq = sequence, error = ?e, "request failed");
                Err(e)
            }
        }
    }

    fn exchange(&mut self, sequence: u32, buf: &[u8]) -> Result<PendingRequest, ReqError> {
        let transport = self.transport.as_mut().ok_or(ReqError::SocketClosed)?;

        transport.send(buf)?;
        self.stats.record_sent(buf.len());

        let deadline = Instant::now() + self.options.timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ReqError::Timeout);
            }

            let datagram = match transport.recv(deadline - now) {
                Ok(datagram) => datagram,
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    tracing::trace!(seq = sequence, "receive interrupted, retrying");
                    continue;
                }
                // Nothing arrived yet, check the deadline again
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) => return Err(e.into()),
            };

            self.stats.record_received(datagram.len());

            for msg in message::unwrap_all(&datagram)? {
                let seq = msg.sequence();

                match self.pending_requests.entry(seq) {
                    Entry::Occupied(mut entry) => {
                        if let Some(result) = entry.get_mut().on_message(msg) {
                            let pending = entry.remove();
                            debug_assert!(pending.is_complete());
                            return result.map(|()| pending);
                        }
                    }
                    Entry::Vacant(_) => {
                        tracing::trace!(seq, expected = sequence, "discarding stray message");
                        self.stats.record_discarded();
                    }
                }
            }
        }
    }

    /// Closes the transport. Every later request fails with [`ReqError::SocketClosed`].
    pub fn close(&mut self) -> Result<(), ReqError> {
        self.pending_requests.clear();

        match self.transport.take() {
            Some(mut transport) => {
                tracing::debug!("closing request socket");
                transport.close().map_err(ReqError::Transport)
            }
            None => Ok(()),
        }
    }
}

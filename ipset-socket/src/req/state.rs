use std::time::Instant;

use ipset_wire::{Message, Payload};

use super::ReqError;

/// Where a request is in its reply sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiveState {
    /// Nothing has arrived yet.
    AwaitingReply,
    /// Part of a multi-part reply has arrived.
    AwaitingMore,
    Done,
    Failed,
}

/// A request waiting for its replies.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) start: Instant,
    /// Whether the request asked for an acknowledgement.
    expects_ack: bool,
    state: ReceiveState,
    messages: Vec<Message>,
}

impl PendingRequest {
    pub(crate) fn new(expects_ack: bool) -> Self {
        Self {
            start: Instant::now(),
            expects_ack,
            state: ReceiveState::AwaitingReply,
            messages: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ReceiveState {
        self.state
    }

    pub(crate) fn is_complete(&self) -> bool {
        matches!(self.state, ReceiveState::Done | ReceiveState::Failed)
    }

    /// Feeds a message carrying this request's sequence number. Returns `Some`
    /// once the exchange is over.
    pub(crate) fn on_message(&mut self, msg: Message) -> Option<Result<(), ReqError>> {
        match &msg.payload {
            Payload::Error(err) if err.is_ack() => {
                self.state = ReceiveState::Done;
                Some(Ok(()))
            }
            Payload::Error(err) => {
                self.state = ReceiveState::Failed;
                Some(Err(ReqError::Kernel(err.code.saturating_abs())))
            }
            Payload::Done(_) => {
                self.state = ReceiveState::Done;
                Some(Ok(()))
            }
            Payload::Overrun => {
                self.state = ReceiveState::Failed;
                Some(Err(ReqError::Overrun))
            }
            Payload::Noop => None,
            Payload::Set { .. } => {
                let multipart = msg.is_multipart();
                self.messages.push(msg);

                if multipart {
                    self.state = ReceiveState::AwaitingMore;
                    None
                } else if self.expects_ack {
                    // The acknowledgement follows the data.
                    None
                } else {
                    self.state = ReceiveState::Done;
                    Some(Ok(()))
                }
            }
        }
    }

    pub(crate) fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

use std::io;

use nix::errno::Errno;
use thiserror::Error;

use ipset_wire::{constants::*, message, nla};

use crate::ReqError;

/// Errors of set-management operations.
#[derive(Debug, Error)]
pub enum SetError {
    #[error("Set or entry already exists")]
    AlreadyExists,
    #[error("Set or entry not found")]
    NotFound,
    /// An add hit `maxelem`. Reported for the first type-specific error code
    /// of an add, which is `IPSET_ERR_HASH_FULL` for `hash:*` types; other
    /// types use that code for their own errors.
    #[error("Set is full")]
    CapacityExceeded,
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Malformed attribute: {0}")]
    MalformedAttribute(#[from] nla::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Transport error: {0:?}")]
    Transport(io::Error),
    #[error("Client closed")]
    Closed,
    #[error("Operation failed with error {0}")]
    OperationFailed(i32),
}

impl SetError {
    /// Maps a kernel error number to a domain error, given the `IPSET_CMD_*`
    /// command it answers. The same number means different things depending
    /// on the command.
    pub fn from_kernel(code: i32, command: u8) -> Self {
        match code {
            c if c == Errno::EEXIST as i32 => Self::AlreadyExists,
            c if c == Errno::ENOENT as i32 => Self::NotFound,
            c if c == Errno::EPERM as i32 || c == Errno::EACCES as i32 => Self::PermissionDenied,
            IPSET_ERR_EXIST => match command {
                IPSET_CMD_DEL | IPSET_CMD_TEST => Self::NotFound,
                _ => Self::AlreadyExists,
            },
            IPSET_ERR_EXIST_SETNAME2 => match command {
                IPSET_CMD_RENAME => Self::AlreadyExists,
                _ => Self::NotFound,
            },
            // Type-specific codes only mean "full" for adds to hash types.
            IPSET_ERR_HASH_FULL if command == IPSET_CMD_ADD => Self::CapacityExceeded,
            other => Self::OperationFailed(other),
        }
    }

    /// Converts a request failure of `command`.
    pub fn from_request(err: ReqError, command: u8) -> Self {
        match err {
            ReqError::Kernel(code) => Self::from_kernel(code, command),
            ReqError::Wire(message::Error::Attribute(e)) => Self::MalformedAttribute(e),
            ReqError::Wire(message::Error::Io(e)) | ReqError::Transport(e) => Self::from(e),
            ReqError::Wire(e) => Self::MalformedMessage(e.to_string()),
            ReqError::Overrun => {
                Self::Transport(io::Error::other("kernel dropped messages (receive buffer overrun)"))
            }
            ReqError::SocketClosed => Self::Closed,
            ReqError::Timeout => Self::Timeout,
        }
    }
}

impl From<io::Error> for SetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Transport(err),
        }
    }
}

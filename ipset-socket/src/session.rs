use std::net::IpAddr;

use ipset_transport::Transport;
use ipset_wire::{constants::IPSET_ERR_EXIST, message, Message, SetAttr};

use crate::{
    dump::{parse_entries, parse_sets},
    Command, EntryOptions, Family, Listing, ReqError, ReqOptions, ReqSocket, ReqStats, SetDescriptor,
    SetEntry, SetError, SetOptions,
};

/// A client for the kernel's ipset subsystem.
///
/// Every method sends one request and waits for its outcome. Nothing is
/// retried.
#[derive(Debug)]
pub struct IpSet<T: Transport> {
    socket: ReqSocket<T>,
}

#[cfg(target_os = "linux")]
impl IpSet<ipset_transport::NetlinkSocket> {
    /// Opens a netlink socket to the running kernel.
    pub fn open() -> Result<Self, SetError> {
        Ok(Self::new(ipset_transport::NetlinkSocket::open()?))
    }
}

impl<T: Transport> IpSet<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ReqOptions::default())
    }

    pub fn with_options(transport: T, options: ReqOptions) -> Self {
        Self { socket: ReqSocket::with_options(transport, options) }
    }

    pub fn stats(&self) -> &ReqStats {
        self.socket.stats()
    }

    fn request(&mut self, command: &Command) -> Result<Vec<Message>, ReqError> {
        let request = command.build(self.socket.options().protocol).map_err(message::Error::from)?;
        tracing::debug!(command = request.command, "executing {:?}", command);

        self.socket.request(request.message_type(), request.flags, request.genmsg(), request.attributes)
    }

    fn execute(&mut self, command: &Command) -> Result<Vec<Message>, SetError> {
        self.request(command).map_err(|e| SetError::from_request(e, command.id()))
    }

    /// Creates a set. Without `options.revision`, the newest revision of the
    /// type the kernel supports is used.
    pub fn create(&mut self, name: &str, options: &SetOptions) -> Result<(), SetError> {
        let revision = match options.revision {
            Some(revision) => revision,
            None => self.type_revisions(&options.type_name, options.family)?.1,
        };

        self.execute(&Command::Create { name: name.to_string(), options: options.clone(), revision })?;
        Ok(())
    }

    pub fn destroy(&mut self, name: &str) -> Result<(), SetError> {
        self.execute(&Command::Destroy { name: name.to_string() })?;
        Ok(())
    }

    /// Removes every entry of a set.
    pub fn flush(&mut self, name: &str) -> Result<(), SetError> {
        self.execute(&Command::Flush { name: name.to_string() })?;
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), SetError> {
        self.execute(&Command::Rename { from: from.to_string(), to: to.to_string() })?;
        Ok(())
    }

    /// Exchanges the contents of two sets of the same type.
    pub fn swap(&mut self, a: &str, b: &str) -> Result<(), SetError> {
        self.execute(&Command::Swap { from: a.to_string(), to: b.to_string() })?;
        Ok(())
    }

    pub fn add(
        &mut self,
        name: &str,
        address: IpAddr,
        options: &EntryOptions,
    ) -> Result<(), SetError> {
        self.execute(&Command::Add { name: name.to_string(), address, options: options.clone() })?;
        Ok(())
    }

    /// Removes an entry. Fails with [`SetError::NotFound`] if it is absent.
    pub fn delete(&mut self, name: &str, address: IpAddr) -> Result<(), SetError> {
        self.execute(&Command::Delete { name: name.to_string(), address })?;
        Ok(())
    }

    /// Checks whether `address` is a member of the set.
    pub fn test(&mut self, name: &str, address: IpAddr) -> Result<bool, SetError> {
        let command = Command::Test { name: name.to_string(), address };
        match self.request(&command) {
            Ok(_) => Ok(true),
            // A missing set is reported as ENOENT instead.
            Err(ReqError::Kernel(IPSET_ERR_EXIST)) => Ok(false),
            Err(e) => Err(SetError::from_request(e, command.id())),
        }
    }

    /// Lists the entries of one set, or every set without entries.
    pub fn list(&mut self, name: Option<&str>) -> Result<Listing, SetError> {
        match name {
            Some(name) => self.list_entries(name).map(Listing::Entries),
            None => self.list_sets().map(Listing::Sets),
        }
    }

    pub fn list_entries(&mut self, name: &str) -> Result<Vec<SetEntry>, SetError> {
        let messages = self.execute(&Command::List { name: Some(name.to_string()) })?;
        parse_entries(&messages)
    }

    pub fn list_sets(&mut self) -> Result<Vec<SetDescriptor>, SetError> {
        let messages = self.execute(&Command::List { name: None })?;
        parse_sets(&messages)
    }

    /// Describes a single set, including its `DATA` block.
    pub fn describe(&mut self, name: &str) -> Result<SetDescriptor, SetError> {
        let messages = self.execute(&Command::List { name: Some(name.to_string()) })?;
        parse_sets(&messages)?
            .into_iter()
            .find(|set| set.name == name)
            .ok_or(SetError::NotFound)
    }

    /// Whether a set with this name exists.
    pub fn exists(&mut self, name: &str) -> Result<bool, SetError> {
        match self.header(name) {
            Ok(_) => Ok(true),
            Err(SetError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Queries the type, family and revision of a set. The kernel does not
    /// report the `DATA` block here; see [`IpSet::describe`].
    pub fn header(&mut self, name: &str) -> Result<SetDescriptor, SetError> {
        let messages = self.execute(&Command::Header { name: name.to_string() })?;
        parse_sets(&messages)?.into_iter().next().ok_or_else(|| {
            SetError::MalformedMessage("header reply without set description".to_string())
        })
    }

    /// Returns the `(minimum, current)` protocol revisions of the kernel.
    pub fn protocol(&mut self) -> Result<(u8, u8), SetError> {
        let reply = self.single_reply(&Command::Protocol)?;
        let attrs = reply.attributes();

        let current = required(attrs, SetAttr::Protocol)?;
        // Kernels predating the minimum only speak one revision.
        let min = ipset_wire::nla::find(attrs, SetAttr::ProtocolMin)
            .map(|attr| attr.as_u8())
            .transpose()?
            .unwrap_or(current);

        Ok((min, current))
    }

    /// Returns the `(minimum, maximum)` revisions of a set type the kernel supports.
    pub fn type_revisions(&mut self, type_name: &str, family: Family) -> Result<(u8, u8), SetError> {
        let command = Command::Type { type_name: type_name.to_string(), family };
        let reply = self.single_reply(&command)?;
        let attrs = reply.attributes();

        let max = required(attrs, SetAttr::Revision)?;
        let min = required(attrs, SetAttr::REVISION_MIN)?;

        Ok((min, max))
    }

    fn single_reply(&mut self, command: &Command) -> Result<Message, SetError> {
        self.execute(command)?.into_iter().next().ok_or_else(|| {
            SetError::MalformedMessage(format!("no reply to {command:?}"))
        })
    }

    /// Closes the client. Every later call fails with [`SetError::Closed`].
    pub fn close(&mut self) -> Result<(), SetError> {
        self.socket.close().map_err(|e| SetError::from_request(e, 0))
    }
}

fn required(attrs: &[ipset_wire::Nla], kind: SetAttr) -> Result<u8, SetError> {
    ipset_wire::nla::find(attrs, kind)
        .ok_or_else(|| SetError::MalformedMessage(format!("missing attribute {kind:?}")))?
        .as_u8()
        .map_err(SetError::from)
}

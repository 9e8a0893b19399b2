mod reqrep;
mod session;

use std::time::Duration;

use ipset_sim::{SimKernel, SimTransport};
use ipset_socket::{IpSet, ReqOptions};

/// A fresh kernel and a client connected to it.
pub fn client() -> (SimKernel, IpSet<SimTransport>) {
    let kernel = SimKernel::default();
    let client = IpSet::new(kernel.connect());
    (kernel, client)
}

/// A client with a short request timeout, for tests that expect timeouts.
pub fn impatient_client(kernel: &SimKernel) -> (ipset_sim::FaultInjector, IpSet<SimTransport>) {
    let transport = kernel.connect();
    let faults = transport.faults();
    let options = ReqOptions::default().with_timeout(Duration::from_millis(50));
    (faults, IpSet::with_options(transport, options))
}

/// A random set name, well within the 31 byte limit.
pub fn set_name() -> String {
    format!("test-{:08x}", rand::random::<u32>())
}

use std::net::{IpAddr, Ipv4Addr};

use ipset::{EntryOptions, IpSet, SetError, SetOptions};
use ipset_sim::SimKernel;

fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    // Two clients of the same in-memory kernel
    let kernel = SimKernel::default();
    let mut active = IpSet::new(kernel.connect());
    let mut staging = IpSet::new(kernel.connect());

    active.create("active", &SetOptions::default()).unwrap();
    staging.create("staging", &SetOptions::default()).unwrap();

    // Build the new contents aside, then swap them in at once
    for _ in 0..100 {
        let addr = IpAddr::V4(Ipv4Addr::from(rand::random::<u32>()));
        match staging.add("staging", addr, &EntryOptions::default()) {
            Ok(()) | Err(SetError::AlreadyExists) => {}
            Err(e) => panic!("add failed: {e}"),
        }
    }
    staging.swap("active", "staging").unwrap();
    staging.destroy("staging").unwrap();

    let entries = active.list_entries("active").unwrap();
    tracing::info!(entries = entries.len(), "swapped in new contents");
    println!("{:?}", kernel.set_names());
}

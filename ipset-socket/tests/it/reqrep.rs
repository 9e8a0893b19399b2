use std::{net::IpAddr, time::Duration};

use ipset_sim::{SimKernel, SimOptions};
use ipset_socket::{EntryOptions, IpSet, SetError, SetOptions};

use crate::{impatient_client, set_name};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn interrupted_receives_are_retried() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::default();
    let (faults, mut ipset) = impatient_client(&kernel);
    let name = set_name();

    faults.interrupt(5);
    ipset.create(&name, &SetOptions::default()).unwrap();
    assert_eq!(kernel.set_names(), [name]);
}

#[test]
fn muted_kernel_times_out() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::default();
    let (faults, mut ipset) = impatient_client(&kernel);
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();

    faults.mute(true);
    let err = ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default()).unwrap_err();
    assert!(matches!(err, SetError::Timeout));
    // The kernel still applied it; only the reply was lost
    assert_eq!(kernel.entry_count(&name), Some(1));

    faults.mute(false);
    assert!(ipset.test(&name, ip("10.0.0.1")).unwrap());
}

#[test]
fn late_replies_are_discarded() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::default();
    let (faults, mut ipset) = impatient_client(&kernel);
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();

    faults.hold_replies(true);
    assert!(matches!(
        ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default()),
        Err(SetError::Timeout)
    ));
    faults.hold_replies(false);

    // The ack of the abandoned add arrives first and must not complete this request
    assert!(matches!(
        ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default()),
        Err(SetError::AlreadyExists)
    ));
    assert_eq!(ipset.stats().discarded(), 1);
}

#[test]
fn stray_messages_are_discarded() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::default();
    let (faults, mut ipset) = impatient_client(&kernel);
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default()).unwrap();

    // Strays carry an error code; taking one for our own would fail the call
    faults.inject_strays(3);
    assert_eq!(ipset.list_entries(&name).unwrap().len(), 1);
    assert_eq!(ipset.stats().discarded(), 3);
}

#[test]
fn several_clients_share_a_kernel() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::default();
    let mut first = IpSet::new(kernel.connect());
    let mut second = IpSet::new(kernel.connect());
    let name = set_name();

    first.create(&name, &SetOptions::default()).unwrap();
    // Concurrent provisioning surfaces as an expected race
    assert!(matches!(second.create(&name, &SetOptions::default()), Err(SetError::AlreadyExists)));

    second.add(&name, ip("10.0.0.1"), &EntryOptions::default()).unwrap();
    assert!(first.test(&name, ip("10.0.0.1")).unwrap());
}

#[test]
fn small_dump_chunks() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::new(SimOptions::default().with_dump_chunk(1));
    let mut ipset = IpSet::new(kernel.connect());
    let name = set_name();

    ipset.create(&name, &SetOptions::default().with_counters()).unwrap();
    for i in 1..=10u8 {
        ipset.add(&name, IpAddr::from([10, 0, 0, i]), &EntryOptions::default()).unwrap();
    }

    let entries = ipset.list_entries(&name).unwrap();
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|e| e.packets == Some(0)));
}

#[test]
fn closed_client_fails() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::default();
    let mut ipset = IpSet::new(kernel.connect());
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    ipset.close().unwrap();

    assert!(matches!(ipset.destroy(&name), Err(SetError::Closed)));
    assert!(matches!(ipset.list_sets(), Err(SetError::Closed)));
    assert_eq!(kernel.set_names(), [name]);
}

#[test]
fn statistics_are_collected() {
    let _ = tracing_subscriber::fmt::try_init();
    let kernel = SimKernel::default();
    let (_, mut ipset) = impatient_client(&kernel);

    ipset.protocol().unwrap();

    let stats = ipset.stats();
    assert!(stats.bytes_tx() > 0);
    assert!(stats.bytes_rx() > 0);
    assert_eq!(stats.answered(), 1);
    assert!(stats.rtt() < Duration::from_secs(1));
}

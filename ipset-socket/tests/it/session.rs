use std::net::{IpAddr, Ipv4Addr};

use ipset_socket::{EntryOptions, Family, Listing, SetError, SetOptions};
use ipset_wire::constants::{
    IPSET_ERR_COMMENT, IPSET_ERR_FIND_TYPE, IPSET_ERR_IPADDR_IPV4, IPSET_ERR_TIMEOUT,
};

use crate::{client, set_name};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// `n` distinct addresses in 10.10.0.0/16.
fn addresses(n: u32) -> impl Iterator<Item = IpAddr> {
    (0..n).map(|i| IpAddr::V4(Ipv4Addr::from(0x0a0a_0000 + i)))
}

#[test]
fn create_list_destroy() {
    let _ = tracing_subscriber::fmt::try_init();
    let (kernel, mut ipset) = client();
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    assert!(ipset.exists(&name).unwrap());
    assert_eq!(kernel.set_names(), [name.clone()]);

    let header = ipset.header(&name).unwrap();
    assert_eq!(header.type_name, "hash:ip");
    assert_eq!(header.family, Family::Inet);
    // The newest revision the kernel offers
    assert_eq!(header.revision, 6);

    ipset.destroy(&name).unwrap();
    assert!(!ipset.exists(&name).unwrap());
}

#[test]
fn exclusive_create() {
    let _ = tracing_subscriber::fmt::try_init();
    let (kernel, mut ipset) = client();
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    assert!(matches!(
        ipset.create(&name, &SetOptions::default()),
        Err(SetError::AlreadyExists)
    ));

    // Idempotent without exclusivity
    ipset.create(&name, &SetOptions::default().with_exclusive(false)).unwrap();
    assert_eq!(kernel.set_names(), [name.clone()]);

    // But only for an identical set
    let different = SetOptions::default().with_exclusive(false).with_maxelem(16);
    assert!(matches!(ipset.create(&name, &different), Err(SetError::AlreadyExists)));
}

#[test]
fn exclusive_add() {
    let _ = tracing_subscriber::fmt::try_init();
    let (kernel, mut ipset) = client();
    let name = set_name();
    let addr = IpAddr::V4(Ipv4Addr::from(rand::random::<u32>()));

    ipset.create(&name, &SetOptions::default()).unwrap();
    ipset.add(&name, addr, &EntryOptions::default()).unwrap();

    assert!(matches!(
        ipset.add(&name, addr, &EntryOptions::default()),
        Err(SetError::AlreadyExists)
    ));
    ipset.add(&name, addr, &EntryOptions::default().with_exclusive(false)).unwrap();

    assert_eq!(kernel.entry_count(&name), Some(1));
}

#[test]
fn counters_are_reported_only_when_enabled() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let with = set_name();
    let without = set_name();

    ipset.create(&with, &SetOptions::default().with_counters()).unwrap();
    ipset.create(&without, &SetOptions::default()).unwrap();
    ipset.add(&with, ip("10.0.0.1"), &EntryOptions::default()).unwrap();
    ipset.add(&without, ip("10.0.0.1"), &EntryOptions::default()).unwrap();

    let entries = ipset.list_entries(&with).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].packets, Some(0));
    assert_eq!(entries[0].bytes, Some(0));

    let entries = ipset.list_entries(&without).unwrap();
    assert_eq!(entries[0].packets, None);
    assert_eq!(entries[0].bytes, None);

    assert!(ipset.describe(&with).unwrap().header.counters);
    assert!(!ipset.describe(&without).unwrap().header.counters);
}

#[test]
fn comments_round_trip() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();
    let comment = "a very simple comment";

    ipset.create(&name, &SetOptions::default().with_comment()).unwrap();
    ipset.add(&name, ip("172.16.202.202"), &EntryOptions::default().with_comment(comment)).unwrap();
    ipset.add(&name, ip("172.16.202.203"), &EntryOptions::default()).unwrap();

    let mut entries = ipset.list_entries(&name).unwrap();
    entries.sort_by_key(|e| e.address);
    assert_eq!(entries[0].comment.as_deref(), Some(comment));
    assert_eq!(entries[1].comment, None);
}

#[test]
fn nul_bytes_are_rejected_before_sending() {
    let _ = tracing_subscriber::fmt::try_init();
    let (kernel, mut ipset) = client();
    let name = set_name();

    ipset.create(&name, &SetOptions::default().with_comment()).unwrap();

    let err = ipset
        .add(&name, ip("10.0.0.1"), &EntryOptions::default().with_comment("alpha\0beta"))
        .unwrap_err();
    assert!(matches!(err, SetError::MalformedAttribute(_)));
    assert_eq!(kernel.entry_count(&name), Some(0));

    let err = ipset.destroy(&format!("{name}\0anything")).unwrap_err();
    assert!(matches!(err, SetError::MalformedAttribute(_)));
    assert_eq!(kernel.set_names(), [name.clone()]);

    assert!(ipset.list_entries(&name).unwrap().is_empty());
}

#[test]
fn comment_requires_comment_set() {
    let (_, mut ipset) = client();
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    let err = ipset
        .add(&name, ip("10.0.0.1"), &EntryOptions::default().with_comment("nope"))
        .unwrap_err();
    assert!(matches!(err, SetError::OperationFailed(IPSET_ERR_COMMENT)));
}

#[test]
fn entry_timeouts() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();
    let plain = set_name();

    ipset.create(&name, &SetOptions::default().with_timeout(600)).unwrap();
    ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default().with_timeout(30)).unwrap();
    ipset.add(&name, ip("10.0.0.2"), &EntryOptions::default()).unwrap();

    let mut entries = ipset.list_entries(&name).unwrap();
    entries.sort_by_key(|e| e.address);
    assert_eq!(entries[0].timeout, Some(30));
    // Entries inherit the default of the set
    assert_eq!(entries[1].timeout, Some(600));

    ipset.create(&plain, &SetOptions::default()).unwrap();
    let err = ipset
        .add(&plain, ip("10.0.0.1"), &EntryOptions::default().with_timeout(30))
        .unwrap_err();
    assert!(matches!(err, SetError::OperationFailed(IPSET_ERR_TIMEOUT)));
}

#[test]
fn header_values_are_read_back() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();

    let options = SetOptions::default().with_maxelem(1000).with_hashsize(10);
    ipset.create(&name, &options).unwrap();
    ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default()).unwrap();

    let header = ipset.describe(&name).unwrap().header;
    assert_eq!(header.maxelem, Some(1000));
    // Rounded up to the minimum hash size
    assert_eq!(header.hashsize, Some(64));
    assert_eq!(header.elements, Some(1));
    assert_eq!(header.references, Some(0));
    assert!(header.memsize.is_some_and(|size| size > 0));
}

#[test]
fn capacity_without_forceadd() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();
    let extra = ip("172.16.202.202");

    ipset.create(&name, &SetOptions::default().with_maxelem(8)).unwrap();
    for addr in addresses(8) {
        ipset.add(&name, addr, &EntryOptions::default()).unwrap();
    }

    assert!(matches!(
        ipset.add(&name, extra, &EntryOptions::default()),
        Err(SetError::CapacityExceeded)
    ));

    let entries = ipset.list_entries(&name).unwrap();
    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|e| e.address != extra));
    assert!(!ipset.test(&name, extra).unwrap());
}

#[test]
fn capacity_with_forceadd() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();
    let extra = ip("172.16.202.202");

    // Enough entries that every bucket holds something to evict
    let options = SetOptions::default().with_maxelem(1024).with_hashsize(64).with_forceadd();
    ipset.create(&name, &options).unwrap();
    for addr in addresses(1024) {
        ipset.add(&name, addr, &EntryOptions::default()).unwrap();
    }

    ipset.add(&name, extra, &EntryOptions::default()).unwrap();

    let entries = ipset.list_entries(&name).unwrap();
    assert_eq!(entries.len(), 1024);
    assert!(entries.iter().any(|e| e.address == extra));
    assert!(ipset.describe(&name).unwrap().header.forceadd);
}

#[test]
fn swap_exchanges_contents() {
    let _ = tracing_subscriber::fmt::try_init();
    let (kernel, mut ipset) = client();
    let a = set_name();
    let b = set_name();

    ipset.create(&a, &SetOptions::default()).unwrap();
    ipset.create(&b, &SetOptions::default()).unwrap();
    ipset.add(&a, ip("10.0.0.1"), &EntryOptions::default()).unwrap();
    ipset.add(&b, ip("10.0.0.2"), &EntryOptions::default()).unwrap();
    ipset.add(&b, ip("10.0.0.3"), &EntryOptions::default()).unwrap();

    ipset.swap(&a, &b).unwrap();

    let mut in_a: Vec<IpAddr> = ipset.list_entries(&a).unwrap().iter().map(|e| e.address).collect();
    in_a.sort();
    assert_eq!(in_a, [ip("10.0.0.2"), ip("10.0.0.3")]);

    let in_b: Vec<IpAddr> = ipset.list_entries(&b).unwrap().iter().map(|e| e.address).collect();
    assert_eq!(in_b, [ip("10.0.0.1")]);

    let mut names = kernel.set_names();
    names.sort();
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(names, expected);

    assert!(matches!(ipset.swap(&a, "missing"), Err(SetError::NotFound)));
}

#[test]
fn flush_keeps_the_set() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    for addr in addresses(100) {
        ipset.add(&name, addr, &EntryOptions::default()).unwrap();
    }

    ipset.flush(&name).unwrap();
    assert!(ipset.list_entries(&name).unwrap().is_empty());

    ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default()).unwrap();
    assert_eq!(ipset.list_entries(&name).unwrap().len(), 1);
}

#[test]
fn destroyed_set_is_gone() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();
    let other = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    ipset.create(&other, &SetOptions::default()).unwrap();
    ipset.destroy(&name).unwrap();

    let Listing::Sets(sets) = ipset.list(None).unwrap() else {
        panic!("expected a set listing");
    };
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].name, other);

    assert!(matches!(ipset.add(&name, ip("10.0.0.1"), &EntryOptions::default()), Err(SetError::NotFound)));
    assert!(matches!(ipset.flush(&name), Err(SetError::NotFound)));
    assert!(matches!(ipset.list_entries(&name), Err(SetError::NotFound)));
    assert!(matches!(ipset.destroy(&name), Err(SetError::NotFound)));
}

#[test]
fn delete_and_test() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();
    let addr = ip("192.168.1.1");

    ipset.create(&name, &SetOptions::default()).unwrap();
    ipset.add(&name, addr, &EntryOptions::default()).unwrap();
    assert!(ipset.test(&name, addr).unwrap());

    ipset.delete(&name, addr).unwrap();
    assert!(!ipset.test(&name, addr).unwrap());
    assert!(matches!(ipset.delete(&name, addr), Err(SetError::NotFound)));
    assert!(matches!(ipset.test("missing", addr), Err(SetError::NotFound)));
}

#[test]
fn rename_moves_the_set() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let from = set_name();
    let to = set_name();
    let taken = set_name();

    ipset.create(&from, &SetOptions::default()).unwrap();
    ipset.create(&taken, &SetOptions::default()).unwrap();
    ipset.add(&from, ip("10.0.0.1"), &EntryOptions::default()).unwrap();

    ipset.rename(&from, &to).unwrap();
    assert!(!ipset.exists(&from).unwrap());
    assert_eq!(ipset.list_entries(&to).unwrap().len(), 1);

    assert!(matches!(ipset.rename(&to, &taken), Err(SetError::AlreadyExists)));
    assert!(matches!(ipset.rename(&from, "anything"), Err(SetError::NotFound)));
}

#[test]
fn ipv6_sets() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let v6 = set_name();
    let v4 = set_name();

    ipset.create(&v6, &SetOptions::default().with_family(Family::Inet6)).unwrap();
    ipset.add(&v6, ip("2001:db8::1"), &EntryOptions::default()).unwrap();

    let entries = ipset.list_entries(&v6).unwrap();
    assert_eq!(entries[0].address, ip("2001:db8::1"));
    assert_eq!(ipset.header(&v6).unwrap().family, Family::Inet6);

    ipset.create(&v4, &SetOptions::default()).unwrap();
    let err = ipset.add(&v4, ip("2001:db8::1"), &EntryOptions::default()).unwrap_err();
    assert!(matches!(err, SetError::OperationFailed(IPSET_ERR_IPADDR_IPV4)));
}

#[test]
fn large_listings_span_messages() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();
    let name = set_name();

    ipset.create(&name, &SetOptions::default()).unwrap();
    for addr in addresses(500) {
        ipset.add(&name, addr, &EntryOptions::default()).unwrap();
    }

    let mut listed: Vec<IpAddr> =
        ipset.list_entries(&name).unwrap().into_iter().map(|e| e.address).collect();
    listed.sort();
    assert_eq!(listed, addresses(500).collect::<Vec<_>>());

    // The descriptor survives the continuation messages
    let set = ipset.describe(&name).unwrap();
    assert_eq!(set.header.elements, Some(500));
}

#[test]
fn kernel_queries() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_, mut ipset) = client();

    assert_eq!(ipset.protocol().unwrap(), (6, 7));
    assert_eq!(ipset.type_revisions("hash:ip", Family::Inet).unwrap(), (0, 6));
    assert!(matches!(
        ipset.type_revisions("hash:nope", Family::Inet),
        Err(SetError::OperationFailed(IPSET_ERR_FIND_TYPE))
    ));

    // An explicit revision skips the type query
    let name = set_name();
    ipset.create(&name, &SetOptions::default().with_revision(2)).unwrap();
    assert_eq!(ipset.header(&name).unwrap().revision, 2);
}

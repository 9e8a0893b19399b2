use ipset::{EntryOptions, IpSet, Listing, SetOptions};

fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    // Talking to the kernel requires CAP_NET_ADMIN
    let mut ipset = IpSet::open().unwrap();

    let (min, current) = ipset.protocol().unwrap();
    println!("Kernel speaks ipset protocol {min}..={current}");

    ipset.create("basic", &SetOptions::default().with_counters().with_comment()).unwrap();
    ipset
        .add("basic", "192.0.2.1".parse().unwrap(), &EntryOptions::default().with_comment("example"))
        .unwrap();

    if let Listing::Entries(entries) = ipset.list(Some("basic")).unwrap() {
        for entry in entries {
            println!("{entry:?}");
        }
    }

    ipset.destroy("basic").unwrap();
}

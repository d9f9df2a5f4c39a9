use std::time::Duration;

use nfs4_client::config::NFS_PORT;
use nfs4_client::connection::Protocol;
use nfs4_client::{Error, MountOptions};

#[test]
fn empty_string_gives_defaults() {
    let options = MountOptions::parse("").expect("parse empty options");
    assert_eq!(options, MountOptions::default());
    assert_eq!(options.protocol, Protocol::Tcp);
    assert_eq!(options.port, NFS_PORT);
}

#[test]
fn parses_every_option() {
    let options = MountOptions::parse(
        "proto=udp, port=2050,timeo=15,retrans=4,retry=9,retry_delay=250,lock_delay=40,\
         actimeo=30,acdirmax=2,rsize=65536,wsize=8192,uid=1000,gid=100,hostname=box",
    )
    .expect("parse options");

    assert_eq!(options.protocol, Protocol::Udp);
    assert_eq!(options.port, 2050);
    assert_eq!(options.timeout, Duration::from_millis(1500));
    assert_eq!(options.retransmits, 4);
    assert_eq!(options.retry_limit, 9);
    assert_eq!(options.retry_delay, Duration::from_millis(250));
    assert_eq!(options.lock_retry_delay, Duration::from_millis(40));
    assert_eq!(options.attr_cache_ttl, Duration::from_secs(30));
    assert_eq!(options.dir_cache_ttl, Duration::from_secs(2));
    assert_eq!(options.rsize, 65536);
    assert_eq!(options.wsize, 8192);
    assert_eq!((options.uid, options.gid), (1000, 100));
    assert_eq!(options.hostname, "box");
}

#[test]
fn rejects_malformed_options() {
    for bad in ["port", "port=abc", "proto=sctp", "colour=blue", "rsize=0", "timeo=-1"] {
        assert!(
            matches!(MountOptions::parse(bad), Err(Error::InvalidArgument(_))),
            "{bad:?} was accepted"
        );
    }
}

#[test]
fn builders_override_defaults() {
    let options = MountOptions::default()
        .with_protocol(Protocol::Udp)
        .with_port(3000)
        .with_timeout(Duration::from_secs(1), 0)
        .with_retry(2, Duration::from_millis(5))
        .with_lock_retry_delay(Duration::from_millis(7))
        .with_cache_ttl(Duration::ZERO, Duration::from_secs(1))
        .with_io_size(0, 4096)
        .with_credentials(1, 2, "client");

    assert_eq!(options.protocol, Protocol::Udp);
    assert_eq!(options.port, 3000);
    assert_eq!((options.timeout, options.retransmits), (Duration::from_secs(1), 0));
    assert_eq!((options.retry_limit, options.retry_delay), (2, Duration::from_millis(5)));
    assert_eq!(options.lock_retry_delay, Duration::from_millis(7));
    assert_eq!(options.attr_cache_ttl, Duration::ZERO);
    // Zero I/O sizes are raised to one byte.
    assert_eq!((options.rsize, options.wsize), (1, 4096));
    assert_eq!(options.hostname, "client");
}

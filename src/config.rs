//! Mount options.
//!
//! Options can be set through the `with_*` builders or parsed from a mount
//! string such as `"proto=udp,port=2050,timeo=10,rsize=65536"`.

use std::str::FromStr;
use std::time::Duration;

use crate::connection::Protocol;
use crate::error::{Error, Result};

/// Default NFS port.
pub const NFS_PORT: u16 = 2049;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountOptions {
    pub protocol: Protocol,
    pub port: u16,
    /// Per-attempt wait for an RPC reply.
    pub timeout: Duration,
    /// Retransmissions after a timed-out attempt.
    pub retransmits: u32,
    /// Bound on NFS4ERR_DELAY / NFS4ERR_GRACE retries.
    pub retry_limit: u32,
    pub retry_delay: Duration,
    /// Polling interval of a blocking lock request.
    pub lock_retry_delay: Duration,
    pub attr_cache_ttl: Duration,
    pub dir_cache_ttl: Duration,
    pub rsize: u32,
    pub wsize: u32,
    pub uid: u32,
    pub gid: u32,
    pub hostname: String,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            port: NFS_PORT,
            timeout: Duration::from_secs(5),
            retransmits: 3,
            retry_limit: 5,
            retry_delay: Duration::from_millis(100),
            lock_retry_delay: Duration::from_millis(100),
            attr_cache_ttl: Duration::from_secs(60),
            dir_cache_ttl: Duration::from_secs(5),
            rsize: 32 * 1024,
            wsize: 32 * 1024,
            uid: 0,
            gid: 0,
            hostname: "localhost".to_string(),
        }
    }
}

fn parse_value<T: FromStr>(value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidArgument("malformed mount option value"))
}

fn parse_millis(value: &str) -> Result<Duration> {
    Ok(Duration::from_millis(parse_value(value)?))
}

fn parse_secs(value: &str) -> Result<Duration> {
    Ok(Duration::from_secs(parse_value(value)?))
}

impl MountOptions {
    /// Parses a comma-separated `key=value` list on top of the defaults.
    ///
    /// Timeouts are given in tenths of a second (`timeo`), like the classic
    /// NFS mount option; the cache lifetimes (`actimeo`, `acdirmax`) are in
    /// seconds and the retry delays in milliseconds.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for option in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            let (key, value) = option
                .split_once('=')
                .ok_or(Error::InvalidArgument("mount option without a value"))?;
            match key {
                "proto" => parsed.protocol = value.parse()?,
                "port" => parsed.port = parse_value(value)?,
                "timeo" => {
                    parsed.timeout = Duration::from_millis(100 * parse_value::<u64>(value)?);
                }
                "retrans" => parsed.retransmits = parse_value(value)?,
                "retry" => parsed.retry_limit = parse_value(value)?,
                "retry_delay" => parsed.retry_delay = parse_millis(value)?,
                "lock_delay" => parsed.lock_retry_delay = parse_millis(value)?,
                "actimeo" => parsed.attr_cache_ttl = parse_secs(value)?,
                "acdirmax" => parsed.dir_cache_ttl = parse_secs(value)?,
                "rsize" => parsed.rsize = parse_value(value)?,
                "wsize" => parsed.wsize = parse_value(value)?,
                "uid" => parsed.uid = parse_value(value)?,
                "gid" => parsed.gid = parse_value(value)?,
                "hostname" => parsed.hostname = value.to_string(),
                _ => return Err(Error::InvalidArgument("unknown mount option")),
            }
        }
        if parsed.rsize == 0 || parsed.wsize == 0 {
            return Err(Error::InvalidArgument("rsize and wsize must be positive"));
        }
        Ok(parsed)
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration, retransmits: u32) -> Self {
        self.timeout = timeout;
        self.retransmits = retransmits;
        self
    }

    pub fn with_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.retry_limit = limit;
        self.retry_delay = delay;
        self
    }

    pub fn with_lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay = delay;
        self
    }

    pub fn with_cache_ttl(mut self, attr: Duration, dir: Duration) -> Self {
        self.attr_cache_ttl = attr;
        self.dir_cache_ttl = dir;
        self
    }

    pub fn with_io_size(mut self, rsize: u32, wsize: u32) -> Self {
        self.rsize = rsize.max(1);
        self.wsize = wsize.max(1);
        self
    }

    pub fn with_credentials(mut self, uid: u32, gid: u32, hostname: &str) -> Self {
        self.uid = uid;
        self.gid = gid;
        self.hostname = hostname.to_string();
        self
    }
}

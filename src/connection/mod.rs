//! Transport to one NFS server.
//!
//! A [Connection] owns exactly one socket bound to one [ServerAddress].
//! Stream connections frame every message with record marking
//! ([record]); packet connections send and receive whole datagrams.
//!
//! `receive` is driven by a single listener per connection and can be
//! interrupted at any time: `reconnect` and `disconnect` fire a
//! cancellation token and a pending `receive` returns
//! [Error::ConnectionAborted] without touching the socket again. When data
//! and cancellation are ready together, cancellation wins.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::NFS_PORT;
use crate::error::{Error, Result};

mod listener;
mod packet;
pub mod record;
mod stream;

pub use listener::ConnectionListener;
pub use packet::{PacketConnection, MAX_PACKET_SIZE};
pub use record::{read_record, write_record, LAST_FRAGMENT};
pub use stream::StreamConnection;

/// Transport protocol; the values are the IP protocol numbers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    #[default]
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    /// ONC RPC netid, as used in universal addresses.
    pub fn netid(self, address: &SocketAddr) -> &'static str {
        match (self, address.is_ipv4()) {
            (Protocol::Tcp, true) => "tcp",
            (Protocol::Tcp, false) => "tcp6",
            (Protocol::Udp, true) => "udp",
            (Protocol::Udp, false) => "udp6",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(Error::InvalidArgument("unknown transport protocol")),
        }
    }
}

/// A resolved server endpoint. Ordered so it can key a map of servers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerAddress {
    pub address: SocketAddr,
    pub protocol: Protocol,
}

impl ServerAddress {
    pub fn new(address: SocketAddr, protocol: Protocol) -> Self {
        Self { address, protocol }
    }

    /// Resolves `name` to an address, preferring IPv4 results.
    ///
    /// A literal IPv4 or IPv6 address is used as is. A port of 0 selects
    /// the standard NFS port.
    pub async fn resolve(name: &str, port: u16, protocol: Protocol) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty server name"));
        }
        let port = if port == 0 { NFS_PORT } else { port };

        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(Self::new(SocketAddr::new(ip, port), protocol));
        }

        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((name, port))
            .await
            .map_err(|_| Error::NotFound)?
            .collect();
        let address = candidates
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or(Error::NotFound)?;
        debug!("resolve({:?}) -> {}", name, address);
        Ok(Self::new(address, protocol))
    }

    pub fn netid(&self) -> &'static str {
        self.protocol.netid(&self.address)
    }

    /// RFC 5665 universal address, `h1.h2.h3.h4.p1.p2` for IPv4.
    pub fn universal_address(&self) -> String {
        let port = self.address.port();
        format!("{}.{}.{}", self.address.ip(), port >> 8, port & 0xff)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.netid(), self.address)
    }
}

/// One socket to one server.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    fn address(&self) -> &ServerAddress;

    /// Local end of the current socket.
    fn local_address(&self) -> Result<SocketAddr>;

    /// Sends one whole message.
    async fn send(&self, buf: &[u8]) -> Result<()>;

    /// Waits for one whole message.
    ///
    /// Fails with [Error::ConnectionAborted] once the connection is
    /// cancelled by [Connection::reconnect] or [Connection::disconnect].
    async fn receive(&self) -> Result<Vec<u8>>;

    /// Aborts a pending `receive` and replaces the socket with a fresh one
    /// to the same address.
    async fn reconnect(&self) -> Result<()>;

    /// Aborts a pending `receive` and closes the socket.
    async fn disconnect(&self);
}

/// Opens a connection using the transport named in `address`.
pub async fn connect(address: &ServerAddress) -> Result<Arc<dyn Connection>> {
    debug!("connect({})", address);
    Ok(match address.protocol {
        Protocol::Tcp => Arc::new(StreamConnection::connect(*address).await?),
        Protocol::Udp => Arc::new(PacketConnection::connect(*address).await?),
    })
}

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Protocol, ServerAddress, StreamConnection};
use crate::error::{Error, Result};

/// Accepts inbound stream connections, e.g. server callbacks.
#[derive(Debug)]
pub struct ConnectionListener {
    listener: TcpListener,
    cancel: CancellationToken,
}

impl ConnectionListener {
    /// Binds to `port` on all IPv4 interfaces; 0 picks an ephemeral port.
    pub async fn listen(port: u16) -> Result<Self> {
        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await.map_err(Error::from)?;
        info!("Listening on {:?}", listener.local_addr());
        Ok(Self { listener, cancel: CancellationToken::new() })
    }

    pub fn local_address(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::from)
    }

    /// Waits for the next connection. Fails with
    /// [Error::ConnectionAborted] after [ConnectionListener::disconnect].
    pub async fn accept(&self) -> Result<StreamConnection> {
        let (stream, peer) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::ConnectionAborted),
            accepted = self.listener.accept() => accepted.map_err(Error::from)?,
        };
        debug!("Accepting connection from {}", peer);
        Ok(StreamConnection::from_stream(stream, ServerAddress::new(peer, Protocol::Tcp)))
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

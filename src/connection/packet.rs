use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Connection, ServerAddress};
use crate::error::{Error, Result};
use crate::{lock, read_lock, write_lock};

/// Largest datagram sent or received.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Datagram connection over UDP. Every message is exactly one datagram.
#[derive(Debug)]
pub struct PacketConnection {
    address: ServerAddress,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    /// Held by the receiver; `reconnect` takes it to wait the receiver out.
    receiving: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
}

async fn open_socket(address: &ServerAddress) -> io::Result<UdpSocket> {
    let bind: SocketAddr = if address.address.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(address.address).await?;
    Ok(socket)
}

impl PacketConnection {
    pub async fn connect(address: ServerAddress) -> Result<Self> {
        let socket = open_socket(&address).await.map_err(Error::from)?;
        Ok(Self {
            address,
            socket: RwLock::new(Some(Arc::new(socket))),
            receiving: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    fn token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    fn current(&self) -> Result<Arc<UdpSocket>> {
        read_lock(&self.socket).clone().ok_or(Error::ConnectionAborted)
    }
}

#[async_trait]
impl Connection for PacketConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn local_address(&self) -> Result<SocketAddr> {
        self.current()?.local_addr().map_err(Error::from)
    }

    async fn send(&self, buf: &[u8]) -> Result<()> {
        if buf.len() > MAX_PACKET_SIZE {
            return Err(Error::InvalidArgument("message does not fit in one datagram"));
        }
        let socket = self.current()?;
        trace!("send {} byte datagram to {}", buf.len(), self.address);
        let sent = socket.send(buf).await.map_err(Error::from)?;
        if sent != buf.len() {
            return Err(Error::Io(io::ErrorKind::WriteZero.into()));
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>> {
        let token = self.token();
        let _receiving = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::ConnectionAborted),
            guard = self.receiving.lock() => guard,
        };
        let socket = self.current()?;
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let size = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::ConnectionAborted),
            size = socket.recv(&mut buf) => size.map_err(Error::from)?,
        };
        if size == 0 {
            return Err(Error::ConnectionAborted);
        }
        buf.truncate(size);
        Ok(buf)
    }

    async fn reconnect(&self) -> Result<()> {
        debug!("reconnect({})", self.address);
        self.token().cancel();
        let _receiving = self.receiving.lock().await;
        write_lock(&self.socket).take();

        let socket = open_socket(&self.address).await.map_err(Error::from)?;
        *write_lock(&self.socket) = Some(Arc::new(socket));
        *lock(&self.cancel) = CancellationToken::new();
        Ok(())
    }

    async fn disconnect(&self) {
        debug!("disconnect({})", self.address);
        self.token().cancel();
        let _receiving = self.receiving.lock().await;
        write_lock(&self.socket).take();
    }
}

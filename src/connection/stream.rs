use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::record::{read_record, write_record};
use super::{Connection, ServerAddress};
use crate::error::{Error, Result};
use crate::lock;

/// Record-marked connection over TCP.
///
/// Sends are serialized by the writer lock so records never interleave.
/// The reader lock is only contended by `reconnect`/`disconnect`, which take
/// it after cancelling to wait until the receiver has let go of the socket.
#[derive(Debug)]
pub struct StreamConnection {
    address: ServerAddress,
    reader: tokio::sync::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    local: Mutex<Option<SocketAddr>>,
    cancel: Mutex<CancellationToken>,
}

impl StreamConnection {
    pub async fn connect(address: ServerAddress) -> Result<Self> {
        let stream = TcpStream::connect(address.address).await.map_err(Error::from)?;
        Ok(Self::from_stream(stream, address))
    }

    /// Wraps an already connected socket, e.g. one accepted by a listener.
    pub fn from_stream(stream: TcpStream, address: ServerAddress) -> Self {
        let _ = stream.set_nodelay(true);
        let local = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();
        Self {
            address,
            reader: tokio::sync::Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            local: Mutex::new(local),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    /// Cancels the receiver and waits until it has released the socket.
    async fn shut_down(&self) -> (
        tokio::sync::MutexGuard<'_, Option<OwnedReadHalf>>,
        tokio::sync::MutexGuard<'_, Option<OwnedWriteHalf>>,
    ) {
        self.token().cancel();
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        reader.take();
        writer.take();
        *lock(&self.local) = None;
        (reader, writer)
    }
}

#[async_trait]
impl Connection for StreamConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn local_address(&self) -> Result<SocketAddr> {
        lock(&self.local).ok_or(Error::ConnectionAborted)
    }

    async fn send(&self, buf: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let socket = writer.as_mut().ok_or(Error::ConnectionAborted)?;
        trace!("send {} bytes to {}", buf.len(), self.address);
        write_record(socket, buf).await.map_err(Error::from)
    }

    async fn receive(&self) -> Result<Vec<u8>> {
        let token = self.token();
        let mut reader = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::ConnectionAborted),
            reader = self.reader.lock() => reader,
        };
        let socket = reader.as_mut().ok_or(Error::ConnectionAborted)?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::ConnectionAborted),
            record = read_record(socket) => record.map_err(Error::from),
        }
    }

    async fn reconnect(&self) -> Result<()> {
        debug!("reconnect({})", self.address);
        let (mut reader, mut writer) = self.shut_down().await;

        let stream = TcpStream::connect(self.address.address).await.map_err(Error::from)?;
        let _ = stream.set_nodelay(true);
        *lock(&self.local) = stream.local_addr().ok();
        let (r, w) = stream.into_split();
        *reader = Some(r);
        *writer = Some(w);
        *lock(&self.cancel) = CancellationToken::new();
        Ok(())
    }

    async fn disconnect(&self) {
        debug!("disconnect({})", self.address);
        self.shut_down().await;
    }
}

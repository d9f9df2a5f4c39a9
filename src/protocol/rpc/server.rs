use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::MountOptions;
use crate::connection::{Connection, ServerAddress};
use crate::error::{Error, Result};
use crate::lock;
use crate::protocol::xdr::rpc::{
    accept_body, auth_unix, call_message, opaque_auth, rejected_reply, reply_body, rpc_body,
    rpc_msg,
};
use crate::protocol::xdr::{self, deserialize, nfs4};

/// Pause before reconnecting after a failed receive.
const RECONNECT_DELAY: Duration = Duration::from_millis(100);

type PendingCalls = Arc<Mutex<HashMap<u32, oneshot::Sender<Vec<u8>>>>>;

/// RPC endpoint of the NFSv4 program on one server.
#[derive(Debug)]
pub struct Server {
    connection: Arc<dyn Connection>,
    credentials: opaque_auth,
    xid: AtomicU32,
    pending: PendingCalls,
    timeout: Duration,
    retransmits: u32,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Starts the reply listener on `connection`. Must run inside a Tokio runtime.
    pub fn new(connection: Arc<dyn Connection>, options: &MountOptions) -> Result<Arc<Self>> {
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as u32);
        let credentials = opaque_auth::unix(&auth_unix {
            stamp,
            machinename: options.hostname.clone(),
            uid: options.uid,
            gid: options.gid,
            gids: vec![options.gid],
        })?;

        let pending = PendingCalls::default();
        let shutdown = CancellationToken::new();
        let listener = tokio::spawn(listen(connection.clone(), pending.clone(), shutdown.clone()));

        Ok(Arc::new(Self {
            connection,
            credentials,
            // Start somewhere unpredictable so a restarted client does not
            // collide with its own entries in the server's reply cache.
            xid: AtomicU32::new(rand::random()),
            pending,
            timeout: options.timeout,
            retransmits: options.retransmits,
            shutdown,
            listener: Mutex::new(Some(listener)),
        }))
    }

    pub fn address(&self) -> &ServerAddress {
        self.connection.address()
    }

    pub fn local_address(&self) -> Result<SocketAddr> {
        self.connection.local_address()
    }

    /// Calls `procedure` with already encoded `args`.
    ///
    /// Returns the procedure results that follow a successful reply header.
    pub async fn call(&self, procedure: u32, args: &[u8]) -> Result<Vec<u8>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ConnectionAborted);
        }
        let xid = self.xid.fetch_add(1, Ordering::Relaxed);
        let header =
            call_message(xid, nfs4::PROGRAM, nfs4::VERSION, procedure, self.credentials.clone());
        let mut message = xdr::to_vec(&header)?;
        message.extend_from_slice(args);

        let (sender, mut receiver) = oneshot::channel();
        lock(&self.pending).insert(xid, sender);
        let result = self.exchange(xid, &message, &mut receiver).await;
        lock(&self.pending).remove(&xid);

        parse_reply(xid, result?)
    }

    async fn exchange(
        &self,
        xid: u32,
        message: &[u8],
        receiver: &mut oneshot::Receiver<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        for attempt in 0..=self.retransmits {
            trace!("xid {} attempt {}", xid, attempt);
            if let Err(e) = self.connection.send(message).await {
                if attempt == self.retransmits {
                    return Err(e);
                }
                // The listener is reconnecting; the retransmission will go out on the new socket.
                warn!("send of xid {} failed: {}", xid, e);
            }
            match tokio::time::timeout(self.timeout, &mut *receiver).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(_)) => return Err(Error::ConnectionAborted),
                Err(_) => debug!("xid {} timed out after {:?}", xid, self.timeout),
            }
        }
        warn!("xid {} got no reply after {} retransmissions", xid, self.retransmits);
        Err(Error::TimedOut)
    }

    /// NULL procedure; checks that the server answers at all.
    pub async fn null(&self) -> Result<()> {
        self.call(nfs4::nfs_proc4::NFSPROC4_NULL as u32, &[]).await.map(|_| ())
    }

    /// Stops the listener and closes the connection. Pending calls fail with
    /// [Error::ConnectionAborted].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.connection.disconnect().await;
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Receives replies and routes each to the call waiting on its xid.
async fn listen(
    connection: Arc<dyn Connection>,
    pending: PendingCalls,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = connection.receive() => received,
        };
        match received {
            Ok(reply) => {
                let Some(xid) = reply.get(..4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                else {
                    warn!("Dropping runt reply of {} bytes", reply.len());
                    continue;
                };
                let waiter = lock(&pending).remove(&xid);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(reply);
                    }
                    None => warn!("Dropping reply with unknown xid {}", xid),
                }
            }
            Err(e) => {
                if shutdown.is_cancelled() {
                    break;
                }
                warn!("receive from {} failed: {}", connection.address(), e);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
                if let Err(e) = connection.reconnect().await {
                    warn!("reconnect to {} failed: {}", connection.address(), e);
                }
            }
        }
    }
    lock(&pending).clear();
    debug!("listener for {} stopped", connection.address());
}

/// Checks the reply header and returns the results that follow it.
fn parse_reply(xid: u32, reply: Vec<u8>) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(reply.as_slice());
    let msg = deserialize::<rpc_msg>(&mut cursor)?;
    if msg.xid != xid {
        return Err(Error::BadXdr(format!("reply xid {} for call {}", msg.xid, xid)));
    }
    let rpc_body::REPLY(body) = msg.body else {
        return Err(Error::BadXdr("expected a reply, got a call".into()));
    };
    match body {
        reply_body::MSG_ACCEPTED(accepted) => match accepted.reply_data {
            accept_body::SUCCESS => {
                let offset = cursor.position() as usize;
                Ok(reply[offset..].to_vec())
            }
            other => Err(Error::Rpc(format!("call not executed: {other:?}"))),
        },
        reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(info)) => {
            Err(Error::Rpc(format!("RPC version mismatch ({}..{})", info.low, info.high)))
        }
        reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)) => {
            Err(Error::Rpc(format!("authentication failed: {stat:?}")))
        }
    }
}

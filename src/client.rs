//! Client identity on one server.
//!
//! [Nfs4Client] establishes the client id with SETCLIENTID and
//! SETCLIENTID_CONFIRM, keeps the lease alive with RENEW and re-establishes
//! the id when the server reports it stale. Each re-establishment starts a
//! new recovery epoch; open state obtained in an older epoch has to be
//! reclaimed before it is used again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MountOptions;
use crate::connection::{self, ServerAddress};
use crate::error::Result;
use crate::file_system::FileSystem;
use crate::lock;
use crate::protocol::nfs4::{ReplyInterpreter, RequestBuilder};
use crate::protocol::rpc::Server;
use crate::protocol::xdr::nfs4::{clientid4, nfsstat4, state_owner4, verifier4};

/// Lease time assumed when the server does not report one.
pub const DEFAULT_LEASE_TIME: Duration = Duration::from_secs(90);

#[derive(Debug)]
struct ClientState {
    client_id: clientid4,
    epoch: u64,
}

#[derive(Debug)]
pub struct Nfs4Client {
    server: Arc<Server>,
    options: MountOptions,
    verifier: verifier4,
    state: Mutex<ClientState>,
    /// Held while the client id is being re-established.
    recovery: tokio::sync::Mutex<()>,
    next_owner: AtomicU64,
    mounts: Mutex<Vec<Weak<FileSystem>>>,
    renewing: AtomicBool,
    renewal: CancellationToken,
}

impl Nfs4Client {
    /// Connects to `address` and establishes a client id.
    pub async fn connect(address: ServerAddress, options: MountOptions) -> Result<Arc<Self>> {
        let connection = connection::connect(&address).await?;
        let server = Server::new(connection, &options)?;
        let client = Arc::new(Self {
            server,
            options,
            verifier: rand::random::<u64>().to_be_bytes(),
            state: Mutex::new(ClientState { client_id: 0, epoch: 0 }),
            recovery: tokio::sync::Mutex::new(()),
            next_owner: AtomicU64::new(1),
            mounts: Mutex::new(Vec::new()),
            renewing: AtomicBool::new(false),
            renewal: CancellationToken::new(),
        });
        client.set_client_id().await?;
        info!("connected to {} as client {:#x}", address, client.client_id());
        Ok(client)
    }

    /// Mounts the export at `path` ("/" for the server's root).
    pub async fn mount(self: &Arc<Self>, path: &str) -> Result<Arc<FileSystem>> {
        FileSystem::mount(self.clone(), path).await
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    pub fn client_id(&self) -> clientid4 {
        lock(&self.state).client_id
    }

    /// Number of times the client id was re-established.
    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    /// Allocates an id for a new open or lock owner.
    pub fn alloc_owner(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    /// Wire owner for `owner_id` under the current client id.
    pub fn owner(&self, owner_id: u64) -> state_owner4 {
        state_owner4 { clientid: self.client_id(), owner: owner_id.to_be_bytes().to_vec() }
    }

    /// Sends one COMPOUND and parses its result header.
    pub async fn send(&self, request: &RequestBuilder) -> Result<ReplyInterpreter> {
        let reply = self.server.call(request.procedure() as u32, &request.finish()).await?;
        ReplyInterpreter::new(reply)
    }

    fn client_name(&self) -> String {
        let local = self
            .server
            .local_address()
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|_| self.options.hostname.clone());
        format!("nfs4-client:{}/{}", local, self.server.address())
    }

    async fn set_client_id(&self) -> Result<()> {
        let mut request = RequestBuilder::compound();
        request.set_client_id(self.verifier, self.client_name().as_bytes())?;
        let mut reply = self.send(&request).await?;
        let result = reply.set_client_id()?;

        let mut request = RequestBuilder::compound();
        request.set_client_id_confirm(result.clientid, result.setclientid_confirm)?;
        let mut reply = self.send(&request).await?;
        reply.set_client_id_confirm()?;

        lock(&self.state).client_id = result.clientid;
        debug!("client id {:#x} confirmed", result.clientid);
        Ok(())
    }

    /// Re-establishes the client id unless another task already did so
    /// since `seen_epoch`. Returns true if this call did the work.
    pub async fn recover(&self, seen_epoch: u64) -> Result<bool> {
        let _recovery = self.recovery.lock().await;
        if self.epoch() != seen_epoch {
            return Ok(false);
        }
        warn!("server lost client {:#x}, re-establishing", self.client_id());
        self.set_client_id().await?;
        lock(&self.state).epoch += 1;
        Ok(true)
    }

    /// Renews the lease and returns the server's status.
    pub async fn renew(&self) -> Result<nfsstat4> {
        let mut request = RequestBuilder::compound();
        request.renew(self.client_id())?;
        let reply = self.send(&request).await?;
        Ok(reply.status())
    }

    /// Registers a mounted file system for state reclaim and starts lease
    /// renewal on the first mount.
    pub(crate) fn register_mount(self: &Arc<Self>, file_system: &Arc<FileSystem>, lease: Duration) {
        let mut mounts = lock(&self.mounts);
        mounts.retain(|fs| fs.strong_count() > 0);
        mounts.push(Arc::downgrade(file_system));
        drop(mounts);
        if !self.renewing.swap(true, Ordering::AcqRel) {
            self.start_renewal(lease);
        }
    }

    /// Asks every mounted file system to reclaim its open state.
    pub(crate) fn reclaim_mounts(&self) {
        for fs in lock(&self.mounts).iter().filter_map(Weak::upgrade) {
            fs.request_reclaim();
        }
    }

    /// Renews the lease every `lease / 3` until shutdown, re-establishing
    /// the client id when the server lost it.
    fn start_renewal(self: &Arc<Self>, lease: Duration) {
        let weak = Arc::downgrade(self);
        let cancel = self.renewal.clone();
        let period = (lease / 3).max(Duration::from_secs(1));
        debug!("renewing lease every {:?}", period);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                let Some(client) = weak.upgrade() else { break };
                let epoch = client.epoch();
                match client.renew().await {
                    Ok(nfsstat4::NFS4_OK) => {}
                    Ok(
                        nfsstat4::NFS4ERR_STALE_CLIENTID
                        | nfsstat4::NFS4ERR_EXPIRED
                        | nfsstat4::NFS4ERR_STALE_STATEID,
                    ) => match client.recover(epoch).await {
                        Ok(_) => client.reclaim_mounts(),
                        Err(e) => error!("client recovery failed: {}", e),
                    },
                    Ok(status) => warn!("RENEW failed: {}", status),
                    Err(e) => warn!("RENEW failed: {}", e),
                }
            }
            debug!("lease renewal stopped");
        });
    }

    /// Stops lease renewal and closes the connection.
    pub async fn shutdown(&self) {
        self.renewal.cancel();
        self.server.shutdown().await;
    }
}

impl Drop for Nfs4Client {
    fn drop(&mut self) {
        self.renewal.cancel();
    }
}

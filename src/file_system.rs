//! One mounted export.
//!
//! [FileSystem] holds what the server told us about the export at mount
//! time, the table of known objects (`id -> FileInfo`, `id -> Inode`), and
//! the registry of open files whose state must survive a client recovery.
//! It also owns the retry policy every COMPOUND goes through: DELAY and
//! GRACE are retried after a pause, lost client state is recovered and
//! expired volatile handles are looked up again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{MutexGuard, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{Nfs4Client, DEFAULT_LEASE_TIME};
use crate::config::MountOptions;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::lock;
use crate::open_state::{seqid_advances, LockOwner, OpenFileCookie, OpenState, SeqId};
use crate::protocol::nfs4::{ReplyInterpreter, RequestBuilder};
use crate::protocol::xdr::nfs4::file::*;
use crate::protocol::xdr::nfs4::*;

/// Attributes read from the export root when mounting.
const MOUNT_ATTRS: &[Attribute] = &[
    Attribute::SupportedAttrs,
    Attribute::Type,
    Attribute::FhExpireType,
    Attribute::Fsid,
    Attribute::LeaseTime,
    Attribute::FileId,
    Attribute::MaxRead,
    Attribute::MaxWrite,
];

static NEXT_DEV_ID: AtomicU64 = AtomicU64::new(1);

/// Where a filesystem object lives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_id: u64,
    pub handle: nfs_fh4,
    /// Handle of the directory the object was found in; `None` for the root.
    pub parent: Option<nfs_fh4>,
    pub name: String,
    /// Path from the export root, without a leading slash.
    pub path: String,
}

impl FileInfo {
    pub fn root(file_id: u64, handle: nfs_fh4) -> Self {
        Self { file_id, handle, ..Default::default() }
    }

    /// Info for `name` found in this directory.
    pub fn child(&self, name: &str, handle: nfs_fh4, file_id: u64) -> Self {
        let path =
            if self.path.is_empty() { name.to_string() } else { format!("{}/{}", self.path, name) };
        Self { file_id, handle, parent: Some(self.handle.clone()), name: name.to_string(), path }
    }
}

/// Inputs of a COMPOUND besides its arguments, used to recover from errors.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Dependencies<'a> {
    /// Objects whose handles the request uses.
    pub files: &'a [u64],
    /// Open state whose stateid the request uses.
    pub state: Option<&'a OpenState>,
    /// Owner sequence ids consumed by the request's seqid-bearing operation.
    pub seqids: &'a [&'a SeqId],
}

#[derive(Debug, Default)]
struct InodeTable {
    infos: HashMap<u64, FileInfo>,
    handles: HashMap<nfs_fh4, u64>,
    inodes: HashMap<u64, Weak<Inode>>,
}

#[derive(Debug)]
pub struct FileSystem {
    this: Weak<FileSystem>,
    client: Arc<Nfs4Client>,
    export: Vec<String>,
    fsid: fsid4,
    supported: Bitmap,
    expire_type: u32,
    max_read: u32,
    max_write: u32,
    root_id: u64,
    dev_id: u64,
    next_file_id: AtomicU64,
    table: Mutex<InodeTable>,
    open_files: Mutex<HashMap<u64, Arc<OpenFileCookie>>>,
    reclaim: Arc<Notify>,
    unmounted: CancellationToken,
}

impl FileSystem {
    /// Mounts the export at `path` on `client`'s server.
    pub async fn mount(client: Arc<Nfs4Client>, path: &str) -> Result<Arc<FileSystem>> {
        let export: Vec<String> =
            path.split('/').filter(|c| !c.is_empty()).map(str::to_string).collect();
        let options = client.options().clone();

        let mut attempt = 0;
        let (handle, attrs) = loop {
            let mut request = RequestBuilder::compound();
            request.put_root_fh()?;
            for component in &export {
                request.look_up(component)?;
            }
            request.get_fh()?;
            request.get_attr(MOUNT_ATTRS)?;

            let mut reply = client.send(&request).await?;
            if back_off(&options, &mut attempt, reply.status()).await? {
                continue;
            }
            reply.put_root_fh()?;
            for _ in &export {
                reply.look_up()?;
            }
            let handle = reply.get_fh()?;
            break (handle, reply.get_attr()?);
        };

        if attrs.file_type() != Some(nfs_ftype4::NF4DIR) {
            return Err(Error::NotADirectory);
        }
        let supported = match attrs.get(Attribute::SupportedAttrs) {
            Some(AttrValue::SupportedAttrs(bitmap)) => bitmap.clone(),
            _ => Bitmap::new(),
        };
        let mut expire_type = FH4_PERSISTENT;
        let mut lease_time = DEFAULT_LEASE_TIME;
        let mut max_read = u64::from(options.rsize);
        let mut max_write = u64::from(options.wsize);
        for value in &attrs.values {
            match value {
                AttrValue::FhExpireType(t) => expire_type = *t,
                AttrValue::LeaseTime(secs) if *secs > 0 => {
                    lease_time = Duration::from_secs(u64::from(*secs))
                }
                AttrValue::MaxRead(n) if *n > 0 => max_read = max_read.min(*n),
                AttrValue::MaxWrite(n) if *n > 0 => max_write = max_write.min(*n),
                _ => {}
            }
        }

        let next_file_id = AtomicU64::new(1);
        let root_id = match attrs.file_id() {
            Some(id) if supported.contains(Attribute::FileId) => id,
            _ => next_file_id.fetch_add(1, Ordering::Relaxed),
        };

        let mut table = InodeTable::default();
        table.handles.insert(handle.clone(), root_id);
        table.infos.insert(root_id, FileInfo::root(root_id, handle));

        let fs = Arc::new_cyclic(|this| FileSystem {
            this: this.clone(),
            client: client.clone(),
            export,
            fsid: attrs.fsid().unwrap_or_default(),
            supported,
            expire_type,
            max_read: max_read as u32,
            max_write: max_write as u32,
            root_id,
            dev_id: NEXT_DEV_ID.fetch_add(1, Ordering::Relaxed),
            next_file_id,
            table: Mutex::new(table),
            open_files: Mutex::new(HashMap::new()),
            reclaim: Arc::new(Notify::new()),
            unmounted: CancellationToken::new(),
        });
        info!(
            "mounted {} (fsid {}.{}, rsize {}, wsize {}, lease {:?})",
            path, fs.fsid.major, fs.fsid.minor, fs.max_read, fs.max_write, lease_time
        );

        tokio::spawn(reclaim_on_request(
            Arc::downgrade(&fs),
            fs.reclaim.clone(),
            fs.unmounted.clone(),
        ));
        client.register_mount(&fs, lease_time);
        Ok(fs)
    }

    fn arc(&self) -> Result<Arc<FileSystem>> {
        self.this.upgrade().ok_or(Error::ConnectionAborted)
    }

    pub fn client(&self) -> &Arc<Nfs4Client> {
        &self.client
    }

    pub fn options(&self) -> &MountOptions {
        self.client.options()
    }

    pub async fn root(&self) -> Result<Arc<Inode>> {
        self.get_inode(self.root_id).await
    }

    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    /// Returns the live inode for `id`, loading its attributes if needed.
    pub async fn get_inode(&self, id: u64) -> Result<Arc<Inode>> {
        let info = {
            let table = lock(&self.table);
            if let Some(inode) = table.inodes.get(&id).and_then(Weak::upgrade) {
                return Ok(inode);
            }
            table.infos.get(&id).cloned().ok_or(Error::NotFound)?
        };
        let inode = Inode::load(self.arc()?, &info).await?;
        Ok(self.insert_inode(inode))
    }

    /// Records an object found by LOOKUP, OPEN or CREATE and returns its
    /// inode. `attrs` must carry at least the object type.
    pub(crate) fn register_file(&self, info: FileInfo, attrs: &fattr4) -> Result<Arc<Inode>> {
        {
            let mut table = lock(&self.table);
            table.handles.insert(info.handle.clone(), info.file_id);
            table.infos.insert(info.file_id, info.clone());
            if let Some(inode) = table.inodes.get(&info.file_id).and_then(Weak::upgrade) {
                drop(table);
                inode.update_attrs(attrs);
                return Ok(inode);
            }
        }
        let inode = Inode::new(self.arc()?, &info, attrs)?;
        Ok(self.insert_inode(inode))
    }

    fn insert_inode(&self, inode: Arc<Inode>) -> Arc<Inode> {
        let mut table = lock(&self.table);
        if let Some(existing) = table.inodes.get(&inode.id()).and_then(Weak::upgrade) {
            return existing;
        }
        table.inodes.insert(inode.id(), Arc::downgrade(&inode));
        inode
    }

    /// Local id for an object: the server's file id when the export has
    /// one, otherwise an id allocated for its handle.
    pub(crate) fn file_id_for(&self, handle: &nfs_fh4, attrs: &fattr4) -> u64 {
        if self.is_attr_supported(Attribute::FileId) {
            if let Some(id) = attrs.file_id() {
                return id;
            }
        }
        if let Some(id) = lock(&self.table).handles.get(handle) {
            return *id;
        }
        self.alloc_file_id()
    }

    pub fn file_info(&self, id: u64) -> Result<FileInfo> {
        lock(&self.table).infos.get(&id).cloned().ok_or(Error::StaleHandle)
    }

    pub(crate) fn handle(&self, id: u64) -> Result<nfs_fh4> {
        lock(&self.table).infos.get(&id).map(|i| i.handle.clone()).ok_or(Error::StaleHandle)
    }

    /// Replaces the recorded location of `info.file_id`.
    pub(crate) fn update_info(&self, info: FileInfo) {
        let mut table = lock(&self.table);
        if let Some(old) = table.infos.get(&info.file_id) {
            if old.handle != info.handle {
                let old = old.handle.clone();
                table.handles.remove(&old);
            }
        }
        table.handles.insert(info.handle.clone(), info.file_id);
        table.infos.insert(info.file_id, info);
    }

    pub fn is_attr_supported(&self, attr: Attribute) -> bool {
        self.supported.contains(attr)
    }

    pub fn alloc_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn fsid(&self) -> fsid4 {
        self.fsid
    }

    pub fn dev_id(&self) -> u64 {
        self.dev_id
    }

    pub fn max_read(&self) -> u32 {
        self.max_read
    }

    pub fn max_write(&self) -> u32 {
        self.max_write
    }

    /// True if the server may expire handles on its own.
    pub fn has_volatile_handles(&self) -> bool {
        self.expire_type & (FH4_VOLATILE_ANY | FH4_VOL_MIGRATION | FH4_VOL_RENAME) != 0
    }

    pub fn open_files_count(&self) -> usize {
        lock(&self.open_files).len()
    }

    pub fn add_open_file(&self, cookie: Arc<OpenFileCookie>) {
        lock(&self.open_files).insert(cookie.id(), cookie);
    }

    pub fn remove_open_file(&self, id: u64) -> Option<Arc<OpenFileCookie>> {
        lock(&self.open_files).remove(&id)
    }

    /// Wakes the background task that reclaims open state.
    pub fn request_reclaim(&self) {
        self.reclaim.notify_one();
    }

    /// Reclaims the state of every open file opened before the last client
    /// recovery, then the locks held through it.
    pub async fn reclaim_open_states(&self) {
        let cookies: Vec<Arc<OpenFileCookie>> = lock(&self.open_files).values().cloned().collect();
        if cookies.is_empty() {
            return;
        }
        debug!("reclaiming {} open files", cookies.len());
        let results =
            futures::future::join_all(cookies.iter().map(|c| self.reclaim_open_file(c))).await;
        for (cookie, result) in cookies.iter().zip(results) {
            if let Err(e) = result {
                error!("reclaim of file {} failed: {}", cookie.file_id(), e);
            }
        }
    }

    async fn reclaim_open_file(&self, cookie: &OpenFileCookie) -> Result<()> {
        self.ensure_state(cookie.state()).await?;
        let mut owner = cookie.lock_owner().lock().await;
        self.reclaim_locks(cookie, &mut owner).await
    }

    /// Sends one COMPOUND built by `build` and decodes the reply with
    /// `decode`, retrying as long as the server asks for it.
    ///
    /// `build` gets the current values of `deps.seqids` and runs again for
    /// every attempt, so it must read handles and stateids afresh.
    pub(crate) async fn compound<T, B, D>(&self, deps: Dependencies<'_>, build: B, decode: D) -> Result<T>
    where
        B: Fn(&mut RequestBuilder, &[seqid4]) -> Result<()>,
        D: FnOnce(&mut ReplyInterpreter) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            if let Some(state) = deps.state {
                self.ensure_state(state).await?;
            }
            let epoch = self.client.epoch();

            let mut seqids = Vec::with_capacity(deps.seqids.len());
            for seqid in deps.seqids {
                seqids.push(seqid.lock().await);
            }
            let values: Vec<seqid4> = seqids.iter().map(|s| **s).collect();

            let mut request = RequestBuilder::compound();
            build(&mut request, &values)?;
            let mut reply = self.client.send(&request).await?;
            advance_seqids(&request, &reply, &mut seqids);
            drop(seqids);

            if self.handle_errors(&mut attempt, reply.status(), epoch, &deps).await? {
                continue;
            }
            return decode(&mut reply);
        }
    }

    /// GETATTR of `attrs` for object `id`.
    pub(crate) async fn get_attrs(&self, id: u64, attrs: &[Attribute]) -> Result<fattr4> {
        let files = [id];
        let deps = Dependencies { files: &files, ..Default::default() };
        self.compound(
            deps,
            |request, _| {
                request.put_fh(&self.handle(id)?)?;
                request.get_attr(attrs)
            },
            |reply| {
                reply.put_fh()?;
                reply.get_attr()
            },
        )
        .await
    }

    /// Recovers from `status` if it can be; returns true when the request
    /// should be sent again.
    pub(crate) async fn handle_errors(
        &self,
        attempt: &mut u32,
        status: nfsstat4,
        epoch: u64,
        deps: &Dependencies<'_>,
    ) -> Result<bool> {
        let options = self.options();
        match status {
            nfsstat4::NFS4ERR_DELAY | nfsstat4::NFS4ERR_GRACE => {
                back_off(options, attempt, status).await
            }
            nfsstat4::NFS4ERR_STALE_CLIENTID
            | nfsstat4::NFS4ERR_STALE_STATEID
            | nfsstat4::NFS4ERR_EXPIRED => {
                *attempt += 1;
                if *attempt > options.retry_limit {
                    return Ok(false);
                }
                if self.client.recover(epoch).await? {
                    self.client.reclaim_mounts();
                }
                Ok(true)
            }
            nfsstat4::NFS4ERR_FHEXPIRED if !deps.files.is_empty() => {
                *attempt += 1;
                if *attempt > options.retry_limit {
                    return Ok(false);
                }
                for id in deps.files {
                    self.refresh_handle(*id).await?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Looks up `id` again by its path from the export root.
    pub(crate) async fn refresh_handle(&self, id: u64) -> Result<()> {
        let mut info = self.file_info(id)?;
        let components: Vec<&str> = self
            .export
            .iter()
            .map(String::as_str)
            .chain(info.path.split('/').filter(|c| !c.is_empty()))
            .collect();
        let has_parent = !info.path.is_empty();
        warn!("file handle of {:?} expired, looking it up again", info.path);

        let mut request = RequestBuilder::compound();
        request.put_root_fh()?;
        for (i, component) in components.iter().enumerate() {
            if has_parent && i + 1 == components.len() {
                request.get_fh()?;
            }
            request.look_up(component)?;
        }
        request.get_fh()?;

        let mut reply = self.client.send(&request).await?;
        reply.put_root_fh()?;
        let mut parent = None;
        for i in 0..components.len() {
            if has_parent && i + 1 == components.len() {
                parent = Some(reply.get_fh()?);
            }
            reply.look_up()?;
        }
        info.handle = reply.get_fh()?;
        if parent.is_some() {
            info.parent = parent;
        }
        self.update_info(info);
        Ok(())
    }

    /// Makes sure `state` was obtained in the current recovery epoch,
    /// reclaiming it otherwise.
    pub(crate) async fn ensure_state(&self, state: &OpenState) -> Result<()> {
        if state.epoch() == self.client.epoch() {
            return Ok(());
        }
        let _reclaim = state.reclaim.lock().await;
        let epoch = self.client.epoch();
        if state.epoch() == epoch {
            return Ok(());
        }
        self.reclaim_state(state, epoch).await
    }

    async fn reclaim_state(&self, state: &OpenState, epoch: u64) -> Result<()> {
        let info = self.file_info(state.file_id())?;
        debug!("reclaiming open of {:?}", info.path);
        let claim = open_claim4::CLAIM_PREVIOUS(open_delegation_type4::OPEN_DELEGATE_NONE);
        let result = match self.reopen(state, &info.handle, claim).await {
            Err(Error::Nfs(nfsstat4::NFS4ERR_NO_GRACE | nfsstat4::NFS4ERR_RECLAIM_BAD)) => {
                // Not a server restart: the server only forgot us, so open anew by name.
                let parent = info.parent.as_ref().ok_or(Error::StaleHandle)?;
                let claim = open_claim4::CLAIM_NULL(info.name.clone());
                self.reopen(state, parent, claim).await
            }
            result => result,
        }?;

        let stateid = if result.rflags & OPEN4_RESULT_CONFIRM != 0 {
            self.confirm_open(state.file_id(), &state.seqid, result.stateid).await?
        } else {
            result.stateid
        };
        state.reclaimed(stateid, epoch);
        Ok(())
    }

    /// OPEN for an existing state, with its own small retry loop.
    async fn reopen(&self, state: &OpenState, dir: &nfs_fh4, claim: open_claim4) -> Result<OPEN4resok> {
        let mut attempt = 0;
        loop {
            let mut seqid = state.seqid.lock().await;
            let mut request = RequestBuilder::compound();
            request.put_fh(dir)?;
            request.open(
                claim.clone(),
                *seqid,
                state.mode().share_access(),
                &self.client.owner(state.owner_id()),
                openflag4::OPEN4_NOCREATE,
            )?;
            let mut reply = self.client.send(&request).await?;
            advance_seqids(&request, &reply, std::slice::from_mut(&mut seqid));
            drop(seqid);

            if back_off(self.options(), &mut attempt, reply.status()).await? {
                continue;
            }
            reply.put_fh()?;
            return reply.open();
        }
    }

    /// OPEN_CONFIRM round trip; returns the confirmed stateid.
    pub(crate) async fn confirm_open(
        &self,
        file_id: u64,
        seqid: &SeqId,
        stateid: stateid4,
    ) -> Result<stateid4> {
        let mut seqid = seqid.lock().await;
        let mut request = RequestBuilder::compound();
        request.put_fh(&self.handle(file_id)?)?;
        request.open_confirm(*seqid, &stateid)?;
        let mut reply = self.client.send(&request).await?;
        advance_seqids(&request, &reply, std::slice::from_mut(&mut seqid));
        reply.put_fh()?;
        reply.open_confirm()
    }

    /// Takes a byte-range lock for `cookie`. The first lock of an owner
    /// introduces it to the server through the open stateid.
    pub(crate) async fn lock_range(
        &self,
        cookie: &OpenFileCookie,
        owner: &mut LockOwner,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
        reclaim: bool,
    ) -> Result<stateid4> {
        let state: &OpenState = cookie.state();
        let files = [cookie.file_id()];
        let lock_owner = self.client.owner(owner.owner_id);
        let existing = owner.stateid;

        let stateid = match existing {
            Some(lock_stateid) => {
                let deps = Dependencies {
                    files: &files,
                    state: Some(state),
                    seqids: &[&owner.seqid],
                };
                self.compound(
                    deps,
                    |request, seqids| {
                        request.put_fh(&self.handle(cookie.file_id())?)?;
                        let locker = locker4::ExistingLockOwner(exist_lock_owner4 {
                            lock_stateid,
                            lock_seqid: seqids[0],
                        });
                        request.lock(locktype, reclaim, offset, length, locker)
                    },
                    |reply| {
                        reply.put_fh()?;
                        reply.lock()
                    },
                )
                .await?
            }
            None => {
                let deps = Dependencies {
                    files: &files,
                    state: Some(state),
                    seqids: &[&state.seqid, &owner.seqid],
                };
                self.compound(
                    deps,
                    |request, seqids| {
                        request.put_fh(&self.handle(cookie.file_id())?)?;
                        let locker = locker4::NewLockOwner(open_to_lock_owner4 {
                            open_seqid: seqids[0],
                            open_stateid: state.stateid(),
                            lock_seqid: seqids[1],
                            lock_owner: lock_owner.clone(),
                        });
                        request.lock(locktype, reclaim, offset, length, locker)
                    },
                    |reply| {
                        reply.put_fh()?;
                        reply.lock()
                    },
                )
                .await?
            }
        };
        owner.stateid = Some(stateid);
        owner.epoch = self.client.epoch();
        Ok(stateid)
    }

    /// Re-takes the locks of `cookie` if its lock owner predates the last
    /// client recovery.
    pub(crate) async fn reclaim_locks(
        &self,
        cookie: &OpenFileCookie,
        owner: &mut LockOwner,
    ) -> Result<()> {
        let epoch = self.client.epoch();
        if owner.stateid.is_none() || owner.epoch == epoch {
            return Ok(());
        }
        owner.reset();
        for held in cookie.locks() {
            debug!("reclaiming lock {}+{} of file {}", held.offset, held.length, cookie.file_id());
            let reclaimed = self
                .lock_range(cookie, owner, held.lock_type, held.offset, held.length, true)
                .await;
            match reclaimed {
                Err(Error::Nfs(nfsstat4::NFS4ERR_NO_GRACE | nfsstat4::NFS4ERR_RECLAIM_BAD)) => {
                    self.lock_range(cookie, owner, held.lock_type, held.offset, held.length, false)
                        .await?;
                }
                other => {
                    other?;
                }
            }
        }
        owner.epoch = epoch;
        Ok(())
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        self.unmounted.cancel();
    }
}

/// Waits for DELAY or GRACE replies to clear. Returns true if the request
/// should be sent again, and times out after `retry_limit` attempts.
async fn back_off(options: &MountOptions, attempt: &mut u32, status: nfsstat4) -> Result<bool> {
    if !matches!(status, nfsstat4::NFS4ERR_DELAY | nfsstat4::NFS4ERR_GRACE) {
        return Ok(false);
    }
    *attempt += 1;
    if *attempt > options.retry_limit {
        warn!("server still returns {} after {} attempts", status, options.retry_limit);
        return Err(Error::TimedOut);
    }
    debug!("server returned {}, retrying in {:?}", status, options.retry_delay);
    tokio::time::sleep(options.retry_delay).await;
    Ok(true)
}

/// Advances the owner sequence ids held in `seqids` if the server evaluated
/// the request's seqid-bearing operation with a status that consumes them.
fn advance_seqids(request: &RequestBuilder, reply: &ReplyInterpreter, seqids: &mut [MutexGuard<'_, seqid4>]) {
    if seqids.is_empty() {
        return;
    }
    let Some(index) = request.ops().iter().position(|op| is_sequenced(*op)) else {
        return;
    };
    let evaluated = reply.result_count();
    if evaluated <= index {
        return;
    }
    let status = if evaluated == index + 1 { reply.status() } else { nfsstat4::NFS4_OK };
    if seqid_advances(status) {
        for seqid in seqids.iter_mut() {
            **seqid = seqid.wrapping_add(1);
        }
    }
}

fn is_sequenced(op: nfs_opnum4) -> bool {
    matches!(
        op,
        nfs_opnum4::OP_OPEN
            | nfs_opnum4::OP_OPEN_CONFIRM
            | nfs_opnum4::OP_OPEN_DOWNGRADE
            | nfs_opnum4::OP_CLOSE
            | nfs_opnum4::OP_LOCK
            | nfs_opnum4::OP_LOCKU
    )
}

/// Reclaims open state whenever a client recovery asks for it.
async fn reclaim_on_request(fs: Weak<FileSystem>, requests: Arc<Notify>, unmounted: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = unmounted.cancelled() => return,
            _ = requests.notified() => {}
        }
        match fs.upgrade() {
            Some(fs) => fs.reclaim_open_states().await,
            None => return,
        }
    }
}

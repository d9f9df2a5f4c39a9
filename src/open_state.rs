//! Open and lock state shared between the open files of one inode.
//!
//! An [OpenState] is one open-owner's OPEN of a file on the server. Every
//! [OpenFileCookie] handed out for the inode holds a counted reference to
//! it; the server state is released with CLOSE when the count drops to zero.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::lock;
use crate::protocol::xdr::nfs4::file::nfs_lock_type4;
use crate::protocol::xdr::nfs4::{nfsstat4, seqid4, stateid4};
use crate::vfs::OpenMode;

/// True if a reply with `status` consumes the owner's sequence id.
///
/// The server leaves the sequence untouched for these errors because it
/// could not tell which owner the request belonged to.
pub fn seqid_advances(status: nfsstat4) -> bool {
    !matches!(
        status,
        nfsstat4::NFS4ERR_STALE_CLIENTID
            | nfsstat4::NFS4ERR_STALE_STATEID
            | nfsstat4::NFS4ERR_BAD_STATEID
            | nfsstat4::NFS4ERR_BAD_SEQID
            | nfsstat4::NFS4ERR_BADXDR
            | nfsstat4::NFS4ERR_RESOURCE
            | nfsstat4::NFS4ERR_NOFILEHANDLE
    )
}

/// Sequence id of an open or lock owner.
///
/// Holding the lock serializes the owner's seqid-bearing requests, which
/// the server requires to arrive in order.
#[derive(Debug, Default)]
pub struct SeqId(AsyncMutex<seqid4>);

impl SeqId {
    pub fn new(seqid: seqid4) -> Self {
        Self(AsyncMutex::new(seqid))
    }

    pub async fn lock(&self) -> MutexGuard<'_, seqid4> {
        self.0.lock().await
    }
}

#[derive(Debug)]
struct StateInner {
    mode: OpenMode,
    stateid: stateid4,
    /// Client recovery epoch the stateid was obtained in.
    epoch: u64,
}

#[derive(Debug)]
pub struct OpenState {
    owner_id: u64,
    file_id: u64,
    pub(crate) seqid: SeqId,
    references: AtomicUsize,
    inner: Mutex<StateInner>,
    /// Serializes reclaims of this state after a client recovery.
    pub(crate) reclaim: AsyncMutex<()>,
}

impl OpenState {
    /// State for an OPEN that just succeeded; it starts with one reference.
    pub fn new(
        owner_id: u64,
        file_id: u64,
        mode: OpenMode,
        stateid: stateid4,
        seqid: seqid4,
        epoch: u64,
    ) -> Self {
        Self {
            owner_id,
            file_id,
            seqid: SeqId::new(seqid),
            references: AtomicUsize::new(1),
            inner: Mutex::new(StateInner { mode, stateid, epoch }),
            reclaim: AsyncMutex::new(()),
        }
    }

    pub fn owner_id(&self) -> u64 {
        self.owner_id
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn mode(&self) -> OpenMode {
        lock(&self.inner).mode
    }

    pub fn stateid(&self) -> stateid4 {
        lock(&self.inner).stateid
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.inner).epoch
    }

    pub fn set_stateid(&self, stateid: stateid4) {
        lock(&self.inner).stateid = stateid;
    }

    /// Records the result of an OPEN that widened the access mode.
    pub fn upgrade(&self, mode: OpenMode, stateid: stateid4) {
        let mut inner = lock(&self.inner);
        inner.mode = mode;
        inner.stateid = stateid;
    }

    /// Records the stateid obtained by reclaiming in a new epoch.
    pub fn reclaimed(&self, stateid: stateid4, epoch: u64) {
        let mut inner = lock(&self.inner);
        inner.stateid = stateid;
        inner.epoch = epoch;
    }

    pub fn references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    pub fn acquire(&self) -> usize {
        self.references.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference and returns how many remain.
    pub fn release(&self) -> usize {
        let previous = self
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

/// A byte range locked through one open file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LockInfo {
    pub lock_type: nfs_lock_type4,
    pub offset: u64,
    /// `u64::MAX` locks to the end of the file.
    pub length: u64,
}

impl LockInfo {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    fn overlaps(&self, offset: u64, end: u64) -> bool {
        self.offset < end && offset < self.end()
    }
}

/// Lock owner of one open file.
///
/// Until its first LOCK succeeds the owner has no stateid and the next LOCK
/// introduces it through the open stateid.
#[derive(Debug)]
pub struct LockOwner {
    pub owner_id: u64,
    pub stateid: Option<stateid4>,
    pub seqid: SeqId,
    /// Client recovery epoch of `stateid`.
    pub epoch: u64,
}

impl LockOwner {
    pub fn new(owner_id: u64) -> Self {
        Self { owner_id, stateid: None, seqid: SeqId::new(0), epoch: 0 }
    }

    /// Forgets the server state, e.g. after the server lost it.
    pub fn reset(&mut self) {
        self.stateid = None;
        self.seqid = SeqId::new(0);
    }
}

static NEXT_COOKIE: AtomicU64 = AtomicU64::new(1);

/// One open of an inode, as returned to the VFS layer.
#[derive(Debug)]
pub struct OpenFileCookie {
    id: u64,
    file_id: u64,
    mode: OpenMode,
    state: Arc<OpenState>,
    lock_owner: AsyncMutex<LockOwner>,
    locks: Mutex<Vec<LockInfo>>,
    cancel: Mutex<CancellationToken>,
}

impl OpenFileCookie {
    pub fn new(
        file_id: u64,
        mode: OpenMode,
        state: Arc<OpenState>,
        lock_owner_id: u64,
    ) -> Self {
        Self {
            id: NEXT_COOKIE.fetch_add(1, Ordering::Relaxed),
            file_id,
            mode,
            state,
            lock_owner: AsyncMutex::new(LockOwner::new(lock_owner_id)),
            locks: Mutex::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn state(&self) -> &Arc<OpenState> {
        &self.state
    }

    pub(crate) fn lock_owner(&self) -> &AsyncMutex<LockOwner> {
        &self.lock_owner
    }

    /// Token a blocking lock wait gives up on.
    pub fn cancellation(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    /// Ends the blocking lock waits in progress; later waits are unaffected.
    pub fn interrupt(&self) {
        let previous = std::mem::take(&mut *lock(&self.cancel));
        previous.cancel();
    }

    pub fn locks(&self) -> Vec<LockInfo> {
        lock(&self.locks).clone()
    }

    pub fn add_lock(&self, info: LockInfo) {
        lock(&self.locks).push(info);
    }

    /// Removes `[offset, offset + length)` from the held locks, splitting
    /// locks that only partly overlap it.
    pub fn remove_lock(&self, offset: u64, length: u64) {
        let end = offset.saturating_add(length);
        let mut locks = lock(&self.locks);
        let mut kept = Vec::with_capacity(locks.len());
        for held in locks.drain(..) {
            if !held.overlaps(offset, end) {
                kept.push(held);
                continue;
            }
            if held.offset < offset {
                kept.push(LockInfo { length: offset - held.offset, ..held });
            }
            if held.end() > end {
                let length = if held.length == u64::MAX { u64::MAX } else { held.end() - end };
                kept.push(LockInfo { offset: end, length, ..held });
            }
        }
        *locks = kept;
    }

    pub fn take_locks(&self) -> Vec<LockInfo> {
        std::mem::take(&mut *lock(&self.locks))
    }
}

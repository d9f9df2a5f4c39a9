use tracing::{debug, warn};
use tracing_attributes::instrument;

use super::Inode;
use crate::error::{Error, Result};
use crate::file_system::Dependencies;
use crate::open_state::{LockInfo, OpenFileCookie};
use crate::protocol::xdr::nfs4::file::nfs_lock_type4;
use crate::protocol::xdr::nfs4::*;
use crate::vfs::{Flock, LockType};

impl Inode {
    fn check_cookie(&self, cookie: &OpenFileCookie) -> Result<()> {
        if cookie.file_id() != self.id {
            return Err(Error::InvalidArgument("open file belongs to another inode"));
        }
        Ok(())
    }

    /// Returns the first lock conflicting with `flock`, if any.
    #[instrument(skip(self, cookie), fields(id = self.id))]
    pub async fn test_lock(&self, cookie: &OpenFileCookie, flock: &Flock) -> Result<Option<Flock>> {
        self.check_cookie(cookie)?;
        let locktype = flock.nfs_lock_type(false)?;
        let (offset, length) = (flock.start, flock.length());
        let owner = {
            let lock_owner = cookie.lock_owner().lock().await;
            self.fs.client().owner(lock_owner.owner_id)
        };
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        self.fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.lock_test(locktype, offset, length, &owner)
                },
                |reply| {
                    reply.put_fh()?;
                    match reply.lock_test() {
                        Ok(()) => Ok(None),
                        Err(Error::WouldBlock) => Ok(reply
                            .denied()
                            .map(|d| Flock::from_nfs(d.locktype, d.offset, d.length))),
                        Err(e) => Err(e),
                    }
                },
            )
            .await
    }

    /// Locks the range of `flock`. With `wait`, a conflict is retried every
    /// `lock_retry_delay` until the lock is granted or the open file is
    /// interrupted; without it the conflict fails with [Error::WouldBlock].
    #[instrument(skip(self, cookie), fields(id = self.id, cookie = cookie.id()))]
    pub async fn acquire_lock(&self, cookie: &OpenFileCookie, flock: &Flock, wait: bool) -> Result<()> {
        self.check_cookie(cookie)?;
        let locktype = flock.nfs_lock_type(wait)?;
        let (offset, length) = (flock.start, flock.length());
        let cancel = cookie.cancellation();
        let delay = self.fs.options().lock_retry_delay;

        loop {
            let mut owner = cookie.lock_owner().lock().await;
            self.fs.reclaim_locks(cookie, &mut owner).await?;
            match self.fs.lock_range(cookie, &mut owner, locktype, offset, length, false).await {
                Ok(_) => break,
                Err(Error::WouldBlock) if wait => {}
                Err(e) => return Err(e),
            }
            drop(owner);
            debug!("lock {}+{} of {} is held elsewhere, waiting", offset, length, self.id);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::WouldBlock),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let plain = if locktype.is_write() { nfs_lock_type4::WRITE_LT } else { nfs_lock_type4::READ_LT };
        cookie.remove_lock(offset, length);
        cookie.add_lock(LockInfo { lock_type: plain, offset, length });
        Ok(())
    }

    /// Unlocks the range of `flock`.
    #[instrument(skip(self, cookie), fields(id = self.id, cookie = cookie.id()))]
    pub async fn release_lock(&self, cookie: &OpenFileCookie, flock: &Flock) -> Result<()> {
        self.check_cookie(cookie)?;
        let (offset, length) = (flock.start, flock.length());
        let mut owner = cookie.lock_owner().lock().await;
        self.fs.reclaim_locks(cookie, &mut owner).await?;
        if owner.stateid.is_some() {
            let locktype = match flock.lock_type {
                LockType::Write => nfs_lock_type4::WRITE_LT,
                _ => nfs_lock_type4::READ_LT,
            };
            self.unlock_range(cookie, &mut owner, locktype, offset, length).await?;
        }
        cookie.remove_lock(offset, length);
        Ok(())
    }

    async fn unlock_range(
        &self,
        cookie: &OpenFileCookie,
        owner: &mut crate::open_state::LockOwner,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let Some(lock_stateid) = owner.stateid else {
            return Ok(());
        };
        let files = [self.id];
        let deps = Dependencies {
            files: &files,
            state: Some(cookie.state().as_ref()),
            seqids: &[&owner.seqid],
        };
        let stateid = self
            .fs
            .compound(
                deps,
                |request, seqids| {
                    request.put_fh(&self.handle()?)?;
                    request.lock_unlock(locktype, seqids[0], &lock_stateid, offset, length)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.lock_unlock()
                },
            )
            .await?;
        owner.stateid = Some(stateid);
        Ok(())
    }

    /// Drops every lock held through `cookie` and releases its lock owner.
    pub async fn release_all_locks(&self, cookie: &OpenFileCookie) -> Result<()> {
        cookie.interrupt();
        let mut owner = cookie.lock_owner().lock().await;
        let held = cookie.take_locks();
        if owner.stateid.is_none() {
            return Ok(());
        }
        if owner.epoch == self.fs.client().epoch() {
            for lock in &held {
                if let Err(e) = self
                    .unlock_range(cookie, &mut owner, lock.lock_type, lock.offset, lock.length)
                    .await
                {
                    warn!("LOCKU {}+{} of {} failed: {}", lock.offset, lock.length, self.id, e);
                }
            }
        }

        let lock_owner = self.fs.client().owner(owner.owner_id);
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let released = self
            .fs
            .compound(
                deps,
                |request, _| request.release_lock_owner(&lock_owner),
                |reply| reply.release_lock_owner(),
            )
            .await;
        owner.reset();
        match released {
            Err(Error::Nfs(nfsstat4::NFS4ERR_LOCKS_HELD)) => {
                warn!("server still holds locks of owner {}", owner.owner_id);
                Ok(())
            }
            other => other,
        }
    }
}

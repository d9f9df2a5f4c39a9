use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};
use tracing_attributes::instrument;

use super::Inode;
use crate::error::{Error, Result};
use crate::file_system::Dependencies;
use crate::lock;
use crate::open_state::{OpenFileCookie, OpenState};
use crate::protocol::xdr::nfs4::file::*;
use crate::protocol::xdr::nfs4::*;
use crate::vfs::{FileType, OpenFlags, OpenMode, SetAttr, STAT_ATTRS};

impl Inode {
    /// Creates regular file `name` in this directory and opens it.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn create(
        self: &Arc<Self>,
        name: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<(Arc<Inode>, Arc<OpenFileCookie>)> {
        self.dir_cache()?;
        let fs = &self.fs;
        let client = fs.client();
        let mut values = vec![AttrValue::Mode(mode & crate::vfs::PERMISSION_MASK)];
        if flags.truncate {
            values.push(AttrValue::Size(0));
        }
        let attrs = fattr4::new(values);
        let how = if flags.exclusive {
            createhow4::GUARDED4(attrs)
        } else {
            createhow4::UNCHECKED4(attrs)
        };

        let state = OpenState::new(
            client.alloc_owner(),
            0,
            flags.mode,
            stateid4::ANONYMOUS,
            0,
            client.epoch(),
        );
        let files = [self.id];
        let deps = Dependencies { files: &files, seqids: &[&state.seqid], ..Default::default() };
        let (result, handle, attrs) = fs
            .compound(
                deps,
                |request, seqids| {
                    request.put_fh(&self.handle()?)?;
                    request.open(
                        open_claim4::CLAIM_NULL(name.to_string()),
                        seqids[0],
                        flags.mode.share_access(),
                        &client.owner(state.owner_id()),
                        openflag4::OPEN4_CREATE(how.clone()),
                    )?;
                    request.get_fh()?;
                    request.get_attr(STAT_ATTRS)
                },
                |reply| {
                    reply.put_fh()?;
                    let result = reply.open()?;
                    Ok((result, reply.get_fh()?, reply.get_attr()?))
                },
            )
            .await?;

        let cinfo = result.cinfo;
        let inode = self.register_child(name, handle, &attrs)?;
        self.apply_change_info(&cinfo, |cache| cache.add_entry(name, inode.id())).await;

        let state = OpenState::new(
            state.owner_id(),
            inode.id,
            flags.mode,
            result.stateid,
            *state.seqid.lock().await,
            client.epoch(),
        );
        let state = inode.confirm(state, &result).await?;
        if inode.file_type != FileType::Regular {
            if let Err(e) = inode.close_state(&state).await {
                warn!("closing open of non-regular {:?} failed: {}", name, e);
            }
            return Err(Error::AlreadyExists);
        }
        let cookie = inode.attach_open(state, flags.mode).await?;
        debug!("create({:?}) -> {}", name, inode.id);
        Ok((inode, cookie))
    }

    /// Opens this regular file.
    ///
    /// All open files of an inode share one open state. An open whose mode
    /// the state already covers only takes another reference; otherwise
    /// the state is upgraded to the union of both modes.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn open(self: &Arc<Self>, flags: OpenFlags) -> Result<Arc<OpenFileCookie>> {
        match self.file_type {
            FileType::Regular => {}
            FileType::Directory => return Err(Error::IsADirectory),
            _ => return Err(Error::InvalidArgument("only regular files can be opened")),
        }
        let state = {
            let mut slot = self.state.lock().await;
            match slot.as_ref() {
                Some(state) if state.mode().covers(flags.mode) => {
                    state.acquire();
                    state.clone()
                }
                Some(state) => {
                    let state = state.clone();
                    self.upgrade_open(&state, state.mode().union(flags.mode)).await?;
                    state.acquire();
                    state
                }
                None => {
                    let state = Arc::new(self.open_new(flags.mode).await?);
                    *slot = Some(state.clone());
                    state
                }
            }
        };

        let cookie = self.register_cookie(state, flags.mode);
        if flags.truncate && flags.mode.can_write() {
            let truncate = SetAttr { size: Some(0), ..Default::default() };
            if let Err(e) = self.write_stat(&truncate).await {
                self.close(&cookie).await?;
                return Err(e);
            }
        }
        Ok(cookie)
    }

    fn register_cookie(&self, state: Arc<OpenState>, mode: OpenMode) -> Arc<OpenFileCookie> {
        let cookie =
            Arc::new(OpenFileCookie::new(self.id, mode, state, self.fs.client().alloc_owner()));
        self.fs.add_open_file(cookie.clone());
        cookie
    }

    /// Makes `state`, fresh from a CREATE, the inode's open state.
    async fn attach_open(&self, state: OpenState, mode: OpenMode) -> Result<Arc<OpenFileCookie>> {
        let mut slot = self.state.lock().await;
        let state = match slot.as_ref() {
            Some(existing) => {
                // The file was already open; keep one state per inode.
                self.close_state(&state).await?;
                let existing = existing.clone();
                if !existing.mode().covers(mode) {
                    self.upgrade_open(&existing, existing.mode().union(mode)).await?;
                }
                existing.acquire();
                existing
            }
            None => {
                let state = Arc::new(state);
                *slot = Some(state.clone());
                state
            }
        };
        drop(slot);
        Ok(self.register_cookie(state, mode))
    }

    /// OPEN by name through the parent directory.
    async fn send_open(&self, state: &OpenState, mode: OpenMode) -> Result<OPEN4resok> {
        let info = self.info()?;
        let parent = info.parent.clone().ok_or(Error::InvalidArgument("no parent to open through"))?;
        let client = self.fs.client();
        let files = [self.id];
        let deps = Dependencies { files: &files, seqids: &[&state.seqid], ..Default::default() };
        self.fs
            .compound(
                deps,
                |request, seqids| {
                    request.put_fh(&parent)?;
                    request.open(
                        open_claim4::CLAIM_NULL(info.name.clone()),
                        seqids[0],
                        mode.share_access(),
                        &client.owner(state.owner_id()),
                        openflag4::OPEN4_NOCREATE,
                    )
                },
                |reply| {
                    reply.put_fh()?;
                    reply.open()
                },
            )
            .await
    }

    async fn open_new(&self, mode: OpenMode) -> Result<OpenState> {
        let client = self.fs.client();
        let state =
            OpenState::new(client.alloc_owner(), self.id, mode, stateid4::ANONYMOUS, 0, client.epoch());
        let result = self.send_open(&state, mode).await?;
        state.set_stateid(result.stateid);
        self.confirm(state, &result).await
    }

    async fn upgrade_open(&self, state: &OpenState, mode: OpenMode) -> Result<()> {
        debug!("upgrading open of {} from {:?} to {:?}", self.id, state.mode(), mode);
        let result = self.send_open(state, mode).await?;
        state.upgrade(mode, result.stateid);
        Ok(())
    }

    /// Confirms a new open owner if the server asks for it.
    async fn confirm(&self, state: OpenState, result: &OPEN4resok) -> Result<OpenState> {
        if result.rflags & OPEN4_RESULT_CONFIRM != 0 {
            let stateid = self.fs.confirm_open(self.id, &state.seqid, result.stateid).await?;
            state.set_stateid(stateid);
        }
        Ok(state)
    }

    async fn close_state(&self, state: &OpenState) -> Result<()> {
        let files = [self.id];
        let deps =
            Dependencies { files: &files, state: Some(state), seqids: &[&state.seqid] };
        self.fs
            .compound(
                deps,
                |request, seqids| {
                    request.put_fh(&self.handle()?)?;
                    request.close(seqids[0], &state.stateid())
                },
                |reply| {
                    reply.put_fh()?;
                    reply.close()
                },
            )
            .await?;
        Ok(())
    }

    /// Closes one open file. The server state goes away with the last one.
    #[instrument(skip(self, cookie), fields(id = self.id, cookie = cookie.id()))]
    pub async fn close(&self, cookie: &OpenFileCookie) -> Result<()> {
        if cookie.file_id() != self.id {
            return Err(Error::InvalidArgument("open file belongs to another inode"));
        }
        cookie.interrupt();
        self.fs.remove_open_file(cookie.id());
        if let Err(e) = self.release_all_locks(cookie).await {
            warn!("dropping locks on close failed: {}", e);
        }
        let committed = if cookie.mode().can_write() { self.commit().await } else { Ok(()) };
        let released = self.release_open(cookie).await;
        committed.and(released)
    }

    /// Drops the cookie's reference on the open state, closing it on the
    /// server with the last one.
    async fn release_open(&self, cookie: &OpenFileCookie) -> Result<()> {
        let mut slot = self.state.lock().await;
        let Some(state) = slot.clone() else {
            return Ok(());
        };
        if !Arc::ptr_eq(&state, cookie.state()) {
            return Ok(());
        }
        if state.release() > 0 {
            return Ok(());
        }
        *slot = None;
        self.close_state(&state).await
    }

    /// Reads into `buf` from `offset`, in chunks of at most the mount's read
    /// size. Returns the number of bytes read; less than `buf.len()` means
    /// end of file, or an error after some data was already read.
    #[instrument(skip(self, cookie, buf), fields(id = self.id, len = buf.len()))]
    pub async fn read(&self, cookie: &OpenFileCookie, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if !cookie.mode().can_read() {
            return Err(Error::AccessDenied);
        }
        let state: &OpenState = cookie.state();
        let chunk = self.fs.max_read().max(1) as usize;
        let mut done = 0;
        while done < buf.len() {
            let count = (buf.len() - done).min(chunk) as u32;
            let Some(position) = offset.checked_add(done as u64) else {
                break;
            };
            let files = [self.id];
            let deps = Dependencies { files: &files, state: Some(state), ..Default::default() };
            let result = self
                .fs
                .compound(
                    deps,
                    |request, _| {
                        request.put_fh(&self.handle()?)?;
                        request.read(&state.stateid(), position, count)
                    },
                    |reply| {
                        reply.put_fh()?;
                        reply.read()
                    },
                )
                .await;
            match result {
                Ok(result) => {
                    let n = result.data.len().min(buf.len() - done);
                    buf[done..done + n].copy_from_slice(&result.data[..n]);
                    done += n;
                    if result.eof || n == 0 {
                        break;
                    }
                }
                Err(e) if done > 0 => {
                    debug!("read stopped after {} bytes: {}", done, e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    /// Writes `data` at `offset` unstably, in chunks of at most the mount's
    /// write size. The inode stays dirty until [Inode::commit].
    #[instrument(skip(self, cookie, data), fields(id = self.id, len = data.len()))]
    pub async fn write(&self, cookie: &OpenFileCookie, offset: u64, data: &[u8]) -> Result<usize> {
        if !cookie.mode().can_write() {
            return Err(Error::AccessDenied);
        }
        if offset.checked_add(data.len() as u64).is_none() {
            return Err(Error::FileTooBig);
        }
        let state: &OpenState = cookie.state();
        let chunk = self.fs.max_write().max(1) as usize;
        let mut done = 0;
        while done < data.len() {
            let piece = &data[done..(done + chunk).min(data.len())];
            let position = offset + done as u64;
            let files = [self.id];
            let deps = Dependencies { files: &files, state: Some(state), ..Default::default() };
            let result = self
                .fs
                .compound(
                    deps,
                    |request, _| {
                        request.put_fh(&self.handle()?)?;
                        request.write(&state.stateid(), position, stable_how4::UNSTABLE4, piece)
                    },
                    |reply| {
                        reply.put_fh()?;
                        reply.write()
                    },
                )
                .await;
            match result {
                Ok(result) => {
                    let n = (result.count as usize).min(piece.len());
                    self.dirty.store(true, Ordering::Release);
                    *lock(&self.write_verifier) = Some(result.writeverf);
                    done += n;
                    if n == 0 {
                        break;
                    }
                }
                Err(e) if done > 0 => {
                    debug!("write stopped after {} bytes: {}", done, e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.grow_cached_size(offset + done as u64);
        Ok(done)
    }

    /// Keeps the cached size in step with our own writes.
    fn grow_cached_size(&self, end: u64) {
        let mut cache = lock(&self.attrs);
        if end > cache.stat.size {
            cache.stat.size = end;
        }
    }

    /// Makes written data stable on the server. Does nothing unless the
    /// inode is dirty.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn commit(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let verifier = self
            .fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.commit(0, 0)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.commit()
                },
            )
            .await;
        let verifier = match verifier {
            Ok(verifier) => verifier,
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        };
        if let Some(written) = *lock(&self.write_verifier) {
            if written != verifier {
                warn!("write verifier of {} changed, server may have lost data", self.id);
                return Err(Error::Io(std::io::Error::other("server lost unstable writes")));
            }
        }
        Ok(())
    }
}

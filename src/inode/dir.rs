use std::sync::Arc;

use tracing::debug;
use tracing_attributes::instrument;

use super::Inode;
use crate::dir_cache::{DirectoryCacheSnapshot, NameCacheEntry};
use crate::error::{Error, Result};
use crate::file_system::Dependencies;
use crate::protocol::nfs4::READDIR_DIRCOUNT;
use crate::protocol::xdr::nfs4::dir::*;
use crate::protocol::xdr::nfs4::*;
use crate::vfs::{DirentWriter, PERMISSION_MASK, STAT_ATTRS};

/// Position of an open directory listing.
///
/// The first read pins a snapshot of the directory; later reads continue
/// through that snapshot even if the cache is invalidated meanwhile.
#[derive(Debug, Default)]
pub struct DirCookie {
    snapshot: Option<Arc<DirectoryCacheSnapshot>>,
    /// 0 is ".", 1 is "..", then snapshot entries.
    position: usize,
    parent: Option<u64>,
}

impl DirCookie {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Restarts the listing; the next read takes a fresh snapshot.
    pub fn rewind(&mut self) {
        self.snapshot = None;
        self.position = 0;
    }
}

impl Inode {
    /// Creates directory `name` in this directory.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn create_dir(self: &Arc<Self>, name: &str, mode: u32) -> Result<Arc<Inode>> {
        let attrs = fattr4::new(vec![AttrValue::Mode(mode & PERMISSION_MASK)]);
        self.create_object(createtype4::NF4DIR, name, attrs).await
    }

    /// Creates symbolic link `name` pointing at `target`.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn create_link(self: &Arc<Self>, name: &str, target: &str) -> Result<Arc<Inode>> {
        let attrs = fattr4::new(vec![AttrValue::Mode(0o777)]);
        self.create_object(createtype4::NF4LNK(target.to_string()), name, attrs).await
    }

    async fn create_object(
        self: &Arc<Self>,
        objtype: createtype4,
        name: &str,
        attrs: fattr4,
    ) -> Result<Arc<Inode>> {
        self.dir_cache()?;
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let (cinfo, handle, attrs) = self
            .fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.create(objtype.clone(), name, attrs.clone())?;
                    request.get_fh()?;
                    request.get_attr(STAT_ATTRS)
                },
                |reply| {
                    reply.put_fh()?;
                    let cinfo = reply.create()?;
                    Ok((cinfo, reply.get_fh()?, reply.get_attr()?))
                },
            )
            .await?;
        let inode = self.register_child(name, handle, &attrs)?;
        self.apply_change_info(&cinfo, |cache| cache.add_entry(name, inode.id())).await;
        Ok(inode)
    }

    /// Target of this symbolic link.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn read_link(&self) -> Result<String> {
        if self.file_type != crate::vfs::FileType::Symlink {
            return Err(Error::InvalidArgument("not a symbolic link"));
        }
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        self.fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.read_link()
                },
                |reply| {
                    reply.put_fh()?;
                    reply.read_link()
                },
            )
            .await
    }

    /// Starts a listing of this directory.
    pub fn open_dir(&self) -> Result<DirCookie> {
        self.dir_cache()?;
        Ok(DirCookie::default())
    }

    /// Packs entries into `buf` as dirents, at most `max_entries` of them,
    /// and returns how many were written.
    ///
    /// Fails with [Error::BufferOverflow] without moving the cookie when not
    /// even one entry fits; 0 means the listing is complete.
    #[instrument(skip(self, cookie, buf), fields(id = self.id, position = cookie.position))]
    pub async fn read_dir(
        self: &Arc<Self>,
        cookie: &mut DirCookie,
        buf: &mut [u8],
        max_entries: usize,
    ) -> Result<usize> {
        let snapshot = match &cookie.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => {
                let snapshot = self.dir_snapshot().await?;
                cookie.snapshot = Some(snapshot.clone());
                snapshot
            }
        };

        let dev = self.fs.dev_id();
        let mut writer = DirentWriter::new(buf);
        while writer.count() < max_entries {
            let (name, ino) = match cookie.position {
                0 => (".", self.id),
                1 => {
                    let parent = match cookie.parent {
                        Some(parent) => parent,
                        None => self.lookup_up().await?.id(),
                    };
                    cookie.parent = Some(parent);
                    ("..", parent)
                }
                n => match snapshot.get(n - 2) {
                    Some(entry) => (entry.name.as_str(), entry.id),
                    None => break,
                },
            };
            if !writer.push(dev, ino, name) {
                if writer.count() == 0 {
                    return Err(Error::BufferOverflow);
                }
                break;
            }
            cookie.position += 1;
        }
        Ok(writer.count())
    }

    /// Returns the cached listing, reading the whole directory if there is
    /// none.
    async fn dir_snapshot(&self) -> Result<Arc<DirectoryCacheSnapshot>> {
        self.revalidate_dir().await?;
        let cache = self.dir_cache()?;
        let mut guard = match cache.lock().await {
            Some(guard) => guard,
            None => cache.reset_and_lock().await,
        };
        if let Some(snapshot) = guard.snapshot() {
            return Ok(snapshot);
        }
        let (snapshot, change) = self.read_whole_dir().await?;
        let snapshot = Arc::new(snapshot);
        guard.install_snapshot(snapshot.clone(), change);
        Ok(snapshot)
    }

    /// READDIR until the end of the directory. Returns the entries and the
    /// change attribute seen before the first page.
    async fn read_whole_dir(&self) -> Result<(DirectoryCacheSnapshot, changeid4)> {
        let fs = &self.fs;
        let mut wanted = vec![Attribute::Type, Attribute::Fsid];
        let by_file_id = fs.is_attr_supported(Attribute::FileId);
        if by_file_id {
            wanted.push(Attribute::FileId);
        }
        if fs.is_attr_supported(Attribute::FileHandle) {
            wanted.push(Attribute::FileHandle);
        }
        let files = [self.id];
        let info = self.info()?;

        let mut entries = Vec::new();
        let mut cookie = READDIR_START_COOKIE;
        let mut verifier = verifier4::default();
        let mut change = None;
        loop {
            let deps = Dependencies { files: &files, ..Default::default() };
            let (page, dir_attrs) = fs
                .compound(
                    deps,
                    |request, _| {
                        request.put_fh(&self.handle()?)?;
                        request.get_attr(&[Attribute::Change])?;
                        request.read_dir(cookie, verifier, &wanted)
                    },
                    |reply| {
                        reply.put_fh()?;
                        let attrs = reply.get_attr()?;
                        Ok((reply.read_dir()?, attrs))
                    },
                )
                .await?;
            change.get_or_insert(dir_attrs.change().unwrap_or_default());
            verifier = page.cookieverf;

            for entry in &page.reply.entries {
                cookie = entry.cookie;
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                if let Some(fsid) = entry.attrs.fsid() {
                    if fsid != fs.fsid() {
                        debug!("skipping {:?}: on another filesystem", entry.name);
                        continue;
                    }
                }
                let handle = match entry.attrs.get(Attribute::FileHandle) {
                    Some(AttrValue::FileHandle(handle)) => Some(handle.clone()),
                    _ => None,
                };
                let id = match (&handle, entry.attrs.file_id()) {
                    (_, Some(id)) if by_file_id => id,
                    (Some(handle), _) => fs.file_id_for(handle, &entry.attrs),
                    _ => fs.alloc_file_id(),
                };
                if let Some(handle) = handle {
                    fs.update_info(info.child(&entry.name, handle, id));
                }
                entries.push(NameCacheEntry { name: entry.name.clone(), id });
            }
            if page.reply.eof || page.reply.entries.is_empty() {
                break;
            }
        }
        debug!("read {} entries of {} ({} bytes per page)", entries.len(), self.id, READDIR_DIRCOUNT);
        Ok((DirectoryCacheSnapshot::new(entries), change.unwrap_or_default()))
    }

    /// Removes `name` from this directory.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.dir_cache()?;
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let cinfo = self
            .fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.remove(name)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.remove()
                },
            )
            .await?;
        self.apply_change_info(&cinfo, |cache| cache.remove_entry(name)).await;
        Ok(())
    }

    /// Renames `from_name` in `from` to `to_name` in `to`.
    #[instrument(skip(from, to), fields(from = from.id, to = to.id))]
    pub async fn rename(from: &Arc<Inode>, from_name: &str, to: &Arc<Inode>, to_name: &str) -> Result<()> {
        from.dir_cache()?;
        to.dir_cache()?;
        let fs = &from.fs;
        let files = [from.id, to.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let result = fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&from.handle()?)?;
                    request.save_fh()?;
                    request.put_fh(&to.handle()?)?;
                    request.rename(from_name, to_name)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.save_fh()?;
                    reply.put_fh()?;
                    reply.rename()
                },
            )
            .await?;

        let moved = from.cached_entry(from_name).await;
        from.apply_change_info(&result.source_cinfo, |cache| cache.remove_entry(from_name)).await;
        to.apply_change_info(&result.target_cinfo, |cache| match moved {
            Some(id) => cache.add_entry(to_name, id),
            None => cache.remove_entry(to_name),
        })
        .await;

        if let Some(id) = moved {
            if let Ok(info) = fs.file_info(id) {
                fs.update_info(to.info()?.child(to_name, info.handle, id));
            }
        }
        Ok(())
    }

    /// Creates hard link `name` in this directory to `target`.
    #[instrument(skip(self, target), fields(id = self.id, target = target.id))]
    pub async fn link(&self, name: &str, target: &Inode) -> Result<()> {
        self.dir_cache()?;
        if target.file_type.is_dir() {
            return Err(Error::IsADirectory);
        }
        let files = [self.id, target.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let cinfo = self
            .fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&target.handle()?)?;
                    request.save_fh()?;
                    request.put_fh(&self.handle()?)?;
                    request.link(name)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.save_fh()?;
                    reply.put_fh()?;
                    reply.link()
                },
            )
            .await?;
        self.apply_change_info(&cinfo, |cache| cache.add_entry(name, target.id)).await;
        target.invalidate_attrs();
        Ok(())
    }
}

//! Filesystem objects and the operations the VFS layer performs on them.
//!
//! An [Inode] caches the attributes of one object for
//! [MountOptions::attr_cache_ttl](crate::config::MountOptions) and, for
//! directories, owns the [DirectoryCache] of its entries. Regular files
//! carry the single [OpenState] shared by all their open files.
//!
//! Operations are split by object kind: `regular` (open, read, write),
//! `dir` (listing and namespace changes) and `lock` (byte-range locks).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::debug;
use tracing_attributes::instrument;

use crate::dir_cache::{DirectoryCache, DirectoryCacheGuard};
use crate::error::{Error, Result};
use crate::file_system::{Dependencies, FileInfo, FileSystem};
use crate::lock;
use crate::open_state::OpenState;
use crate::protocol::xdr::nfs4::file::*;
use crate::protocol::xdr::nfs4::*;
use crate::vfs::{FileType, SetAttr, Stat, R_OK, STAT_ATTRS, W_OK, X_OK};

mod dir;
mod lock;
mod regular;

pub use dir::DirCookie;

#[derive(Debug)]
struct AttrCache {
    stat: Stat,
    expire: Instant,
}

#[derive(Debug)]
pub struct Inode {
    fs: Arc<FileSystem>,
    id: u64,
    file_type: FileType,
    attrs: Mutex<AttrCache>,
    dir_cache: Option<DirectoryCache>,
    /// The open state of a regular file; guards opening and closing.
    state: tokio::sync::Mutex<Option<Arc<OpenState>>>,
    dirty: AtomicBool,
    write_verifier: Mutex<Option<verifier4>>,
}

impl Inode {
    /// Builds an inode from attributes that include its type.
    pub(crate) fn new(fs: Arc<FileSystem>, info: &FileInfo, attrs: &fattr4) -> Result<Arc<Inode>> {
        let file_type: FileType = attrs
            .file_type()
            .ok_or_else(|| Error::BadXdr("object type missing from attributes".into()))?
            .into();
        let options = fs.options();
        let dir_cache = file_type.is_dir().then(|| DirectoryCache::new(options.dir_cache_ttl));
        let stat = Stat::from_attrs(attrs, fs.dev_id(), info.file_id);
        let expire = Instant::now() + options.attr_cache_ttl;
        Ok(Arc::new(Inode {
            fs,
            id: info.file_id,
            file_type,
            attrs: Mutex::new(AttrCache { stat, expire }),
            dir_cache,
            state: tokio::sync::Mutex::new(None),
            dirty: AtomicBool::new(false),
            write_verifier: Mutex::new(None),
        }))
    }

    /// Fetches the attributes of `info` and builds its inode.
    pub(crate) async fn load(fs: Arc<FileSystem>, info: &FileInfo) -> Result<Arc<Inode>> {
        let attrs = fs.get_attrs(info.file_id, STAT_ATTRS).await?;
        Inode::new(fs, info, &attrs)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn file_system(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    pub fn name(&self) -> String {
        self.fs.file_info(self.id).map(|i| i.name).unwrap_or_default()
    }

    /// Path from the export root.
    pub fn path(&self) -> String {
        self.fs.file_info(self.id).map(|i| i.path).unwrap_or_default()
    }

    /// Number of open files sharing this inode's open state.
    pub async fn open_state_references(&self) -> usize {
        self.state.lock().await.as_ref().map_or(0, |s| s.references())
    }

    /// True if data was written since the last commit.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn info(&self) -> Result<FileInfo> {
        self.fs.file_info(self.id)
    }

    fn handle(&self) -> Result<nfs_fh4> {
        self.fs.handle(self.id)
    }

    fn dir_cache(&self) -> Result<&DirectoryCache> {
        self.dir_cache.as_ref().ok_or(Error::NotADirectory)
    }

    /// Replaces the cached attributes if `attrs` is a full stat set.
    pub(crate) fn update_attrs(&self, attrs: &fattr4) {
        if attrs.size().is_none() || attrs.file_type().is_none() {
            return;
        }
        let stat = Stat::from_attrs(attrs, self.fs.dev_id(), self.id);
        let mut cache = lock(&self.attrs);
        cache.stat = stat;
        cache.expire = Instant::now() + self.fs.options().attr_cache_ttl;
    }

    fn invalidate_attrs(&self) {
        lock(&self.attrs).expire = Instant::now();
    }

    /// Returns the attributes, asking the server once the cache expired.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn stat(&self) -> Result<Stat> {
        {
            let cache = lock(&self.attrs);
            if Instant::now() < cache.expire {
                return Ok(cache.stat.clone());
            }
        }
        let attrs = self.fs.get_attrs(self.id, STAT_ATTRS).await?;
        self.update_attrs(&attrs);
        Ok(lock(&self.attrs).stat.clone())
    }

    /// Changes mode, size, owner or times.
    ///
    /// Size changes go through the open stateid when the file is open for
    /// writing, so they do not conflict with our own share reservation.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn write_stat(&self, changes: &SetAttr) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        if changes.size.is_some() && self.file_type.is_dir() {
            return Err(Error::IsADirectory);
        }
        let state = match changes.size {
            Some(_) => self.state.lock().await.clone().filter(|s| s.mode().can_write()),
            None => None,
        };
        let attrs = changes.to_fattr4();
        let files = [self.id];
        let deps = Dependencies { files: &files, state: state.as_deref(), ..Default::default() };
        let updated = self
            .fs
            .compound(
                deps,
                |request, _| {
                    let stateid = state.as_ref().map_or(stateid4::ANONYMOUS, |s| s.stateid());
                    request.put_fh(&self.handle()?)?;
                    request.set_attr(&stateid, attrs.clone())?;
                    request.get_attr(STAT_ATTRS)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.set_attr()?;
                    reply.get_attr()
                },
            )
            .await?;
        self.update_attrs(&updated);
        Ok(())
    }

    /// Checks `mode` (a mask of `R_OK`, `W_OK`, `X_OK`) against what the
    /// server grants the mounting user.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn access(&self, mode: u32) -> Result<()> {
        let all = ACCESS4_READ
            | ACCESS4_LOOKUP
            | ACCESS4_MODIFY
            | ACCESS4_EXTEND
            | ACCESS4_DELETE
            | ACCESS4_EXECUTE;
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let result = self
            .fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.access(all)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.access()
                },
            )
            .await?;

        let granted = result.access & result.supported;
        let mut needed = 0;
        if mode & R_OK != 0 {
            needed |= ACCESS4_READ;
        }
        if mode & W_OK != 0 {
            needed |= ACCESS4_MODIFY;
        }
        if mode & X_OK != 0 {
            needed |= if self.file_type.is_dir() { ACCESS4_LOOKUP } else { ACCESS4_EXECUTE };
        }
        if granted & needed != needed {
            debug!("access {:#o} denied, server grants {:#x}", mode, granted);
            return Err(Error::AccessDenied);
        }
        Ok(())
    }

    /// Looks `name` up in this directory.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn lookup(self: &Arc<Self>, name: &str) -> Result<Arc<Inode>> {
        self.dir_cache()?;
        match name {
            "." => return Ok(self.clone()),
            ".." => return self.lookup_up().await,
            _ => {}
        }

        self.revalidate_dir().await?;
        if let Some(id) = self.cached_entry(name).await {
            match self.fs.get_inode(id).await {
                Ok(inode) => return Ok(inode),
                Err(e) => debug!("cached entry {:?} unusable: {}", name, e),
            }
        }

        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let (handle, attrs) = self
            .fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.look_up(name)?;
                    request.get_fh()?;
                    request.get_attr(STAT_ATTRS)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.look_up()?;
                    Ok((reply.get_fh()?, reply.get_attr()?))
                },
            )
            .await?;

        let inode = self.register_child(name, handle, &attrs)?;
        if let Some(mut cache) = self.dir_cache()?.lock().await {
            cache.add_entry(name, inode.id());
        }
        debug!("lookup({:?}) -> {}", name, inode.id());
        Ok(inode)
    }

    /// Returns the parent directory; the root is its own parent.
    #[instrument(skip(self), fields(id = self.id))]
    pub async fn lookup_up(self: &Arc<Self>) -> Result<Arc<Inode>> {
        self.dir_cache()?;
        if self.id == self.fs.root_id() {
            return Ok(self.clone());
        }
        let files = [self.id];
        let deps = Dependencies { files: &files, ..Default::default() };
        let (handle, attrs) = self
            .fs
            .compound(
                deps,
                |request, _| {
                    request.put_fh(&self.handle()?)?;
                    request.look_up_up()?;
                    request.get_fh()?;
                    request.get_attr(STAT_ATTRS)
                },
                |reply| {
                    reply.put_fh()?;
                    reply.look_up_up()?;
                    Ok((reply.get_fh()?, reply.get_attr()?))
                },
            )
            .await?;

        let id = self.fs.file_id_for(&handle, &attrs);
        let info = match self.fs.file_info(id) {
            Ok(known) => FileInfo { handle, ..known },
            Err(_) => {
                let mine = self.info()?;
                let path = mine.path.rsplit_once('/').map_or("", |(parent, _)| parent);
                let name = path.rsplit('/').next().unwrap_or_default();
                FileInfo { file_id: id, handle, parent: None, name: name.into(), path: path.into() }
            }
        };
        self.fs.register_file(info, &attrs)
    }

    /// Records `name` in this directory and returns its inode.
    fn register_child(&self, name: &str, handle: nfs_fh4, attrs: &fattr4) -> Result<Arc<Inode>> {
        let id = self.fs.file_id_for(&handle, attrs);
        let info = self.info()?.child(name, handle, id);
        self.fs.register_file(info, attrs)
    }

    async fn cached_entry(&self, name: &str) -> Option<u64> {
        let cache = self.dir_cache.as_ref()?;
        cache.lock().await?.entry(name)
    }

    /// Checks an expired directory cache against the server's change
    /// attribute before it is trusted again.
    async fn revalidate_dir(&self) -> Result<()> {
        let cache = self.dir_cache()?;
        let Some(mut guard) = cache.lock().await else {
            return Ok(());
        };
        if !guard.is_expired() {
            return Ok(());
        }
        let attrs = self.fs.get_attrs(self.id, &[Attribute::Change]).await?;
        if let Some(change) = attrs.change() {
            guard.validate_change_info(change);
        }
        guard.touch();
        Ok(())
    }

    /// Applies the change info of a modification this client made: the
    /// cache is patched by `update` if nobody else changed the directory in
    /// between, and trashed otherwise.
    async fn apply_change_info<F>(&self, cinfo: &change_info4, update: F)
    where
        F: FnOnce(&mut DirectoryCacheGuard<'_>),
    {
        self.invalidate_attrs();
        let Some(cache) = self.dir_cache.as_ref() else {
            return;
        };
        let Some(mut guard) = cache.lock().await else {
            return;
        };
        if cinfo.atomic && guard.change_info() == cinfo.before {
            update(&mut guard);
            guard.set_change_info(cinfo.after);
        } else {
            debug!("directory {} changed concurrently, dropping its cache", self.id);
            guard.trash();
        }
    }
}

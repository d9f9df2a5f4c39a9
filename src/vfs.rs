//! Types crossing the boundary between the client and the virtual file
//! system layer that drives it.
//!
//! The VFS layer talks in POSIX terms: mode bits, open flags, `struct
//! stat`-like records, byte-range locks and packed directory entries. This
//! module converts between those and their NFSv4 counterparts.

use byteorder::{ByteOrder, NativeEndian};
use filetime::FileTime;

use crate::error::{Error, Result};
use crate::protocol::xdr::nfs4::file::{
    nfs_lock_type4, OPEN4_SHARE_ACCESS_BOTH, OPEN4_SHARE_ACCESS_READ, OPEN4_SHARE_ACCESS_WRITE,
};
use crate::protocol::xdr::nfs4::{fattr4, nfs_ftype4, settime4, AttrValue, Attribute};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Permission bits that SETATTR may change.
pub const PERMISSION_MASK: u32 = 0o7777;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FileType {
    #[default]
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Socket,
    Fifo,
    /// Named attribute directory and named attributes.
    Attribute,
}

impl FileType {
    /// `S_IF*` bits for this type.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Regular | FileType::Attribute => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
            FileType::BlockDevice => S_IFBLK,
            FileType::CharDevice => S_IFCHR,
            FileType::Socket => S_IFSOCK,
            FileType::Fifo => S_IFIFO,
        }
    }

    pub fn is_dir(self) -> bool {
        self == FileType::Directory
    }
}

impl From<nfs_ftype4> for FileType {
    fn from(t: nfs_ftype4) -> Self {
        match t {
            nfs_ftype4::NF4REG => FileType::Regular,
            nfs_ftype4::NF4DIR | nfs_ftype4::NF4ATTRDIR => FileType::Directory,
            nfs_ftype4::NF4LNK => FileType::Symlink,
            nfs_ftype4::NF4BLK => FileType::BlockDevice,
            nfs_ftype4::NF4CHR => FileType::CharDevice,
            nfs_ftype4::NF4SOCK => FileType::Socket,
            nfs_ftype4::NF4FIFO => FileType::Fifo,
            nfs_ftype4::NF4NAMEDATTR => FileType::Attribute,
        }
    }
}

/// Attributes requested to fill a [Stat].
pub const STAT_ATTRS: &[Attribute] = &[
    Attribute::Type,
    Attribute::Change,
    Attribute::Size,
    Attribute::Fsid,
    Attribute::FileId,
    Attribute::Mode,
    Attribute::NumLinks,
    Attribute::Owner,
    Attribute::OwnerGroup,
    Attribute::SpaceUsed,
    Attribute::TimeAccess,
    Attribute::TimeMetadata,
    Attribute::TimeModify,
];

/// Cached object attributes, shaped like `struct stat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub file_type: FileType,
    /// Type and permission bits.
    pub mode: u32,
    pub nlink: u32,
    /// Owner as reported by the server, usually `user@domain` or a number.
    pub owner: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub ctime: FileTime,
    /// Server change attribute.
    pub change: u64,
}

impl Default for Stat {
    fn default() -> Self {
        Self {
            dev: 0,
            ino: 0,
            file_type: FileType::Regular,
            mode: S_IFREG,
            nlink: 1,
            owner: String::new(),
            group: String::new(),
            uid: 0,
            gid: 0,
            size: 0,
            blocks: 0,
            atime: FileTime::zero(),
            mtime: FileTime::zero(),
            ctime: FileTime::zero(),
            change: 0,
        }
    }
}

/// Numeric part of an NFSv4 owner string, if it has one.
fn owner_id(owner: &str) -> u32 {
    owner.split('@').next().and_then(|id| id.parse().ok()).unwrap_or(0)
}

impl Stat {
    /// Builds a stat record from whatever attributes `attrs` carries.
    pub fn from_attrs(attrs: &fattr4, dev: u64, ino: u64) -> Self {
        let mut stat = Stat { dev, ino, ..Default::default() };
        let mut permissions = 0o644;
        for value in &attrs.values {
            match value {
                AttrValue::Type(t) => stat.file_type = (*t).into(),
                AttrValue::Change(change) => stat.change = *change,
                AttrValue::Size(size) => stat.size = *size,
                AttrValue::Mode(mode) => permissions = mode & PERMISSION_MASK,
                AttrValue::NumLinks(nlink) => stat.nlink = *nlink,
                AttrValue::Owner(owner) => {
                    stat.uid = owner_id(owner);
                    stat.owner = owner.clone();
                }
                AttrValue::OwnerGroup(group) => {
                    stat.gid = owner_id(group);
                    stat.group = group.clone();
                }
                AttrValue::SpaceUsed(used) => stat.blocks = used.div_ceil(512),
                AttrValue::TimeAccess(t) => stat.atime = (*t).into(),
                AttrValue::TimeModify(t) => stat.mtime = (*t).into(),
                AttrValue::TimeMetadata(t) => stat.ctime = (*t).into(),
                _ => {}
            }
        }
        stat.mode = stat.file_type.mode_bits() | permissions;
        stat
    }

    pub fn permissions(&self) -> u32 {
        self.mode & PERMISSION_MASK
    }
}

/// New time for SETATTR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetTime {
    ServerTime,
    ClientTime(FileTime),
}

impl From<SetTime> for settime4 {
    fn from(time: SetTime) -> Self {
        match time {
            SetTime::ServerTime => settime4::SET_TO_SERVER_TIME4,
            SetTime::ClientTime(t) => settime4::SET_TO_CLIENT_TIME4(t.into()),
        }
    }
}

/// Attribute changes for `write_stat`; `None` leaves a field alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SetTime>,
    pub mtime: Option<SetTime>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl SetAttr {
    pub fn is_empty(&self) -> bool {
        *self == SetAttr::default()
    }

    pub fn to_fattr4(&self) -> fattr4 {
        let mut values = Vec::new();
        if let Some(size) = self.size {
            values.push(AttrValue::Size(size));
        }
        if let Some(mode) = self.mode {
            values.push(AttrValue::Mode(mode & PERMISSION_MASK));
        }
        if let Some(owner) = &self.owner {
            values.push(AttrValue::Owner(owner.clone()));
        }
        if let Some(group) = &self.group {
            values.push(AttrValue::OwnerGroup(group.clone()));
        }
        if let Some(atime) = self.atime {
            values.push(AttrValue::TimeAccessSet(atime.into()));
        }
        if let Some(mtime) = self.mtime {
            values.push(AttrValue::TimeModifySet(mtime.into()));
        }
        fattr4::new(values)
    }
}

/// `access(2)` request bits.
pub const R_OK: u32 = 4;
pub const W_OK: u32 = 2;
pub const X_OK: u32 = 1;

/// Access an open file was opened for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum OpenMode {
    #[default]
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn share_access(self) -> u32 {
        match self {
            OpenMode::Read => OPEN4_SHARE_ACCESS_READ,
            OpenMode::Write => OPEN4_SHARE_ACCESS_WRITE,
            OpenMode::ReadWrite => OPEN4_SHARE_ACCESS_BOTH,
        }
    }

    /// True if an open in `self` mode already allows `other`.
    pub fn covers(self, other: OpenMode) -> bool {
        self == other || self == OpenMode::ReadWrite
    }

    pub fn union(self, other: OpenMode) -> OpenMode {
        if self.covers(other) {
            self
        } else if other.covers(self) {
            other
        } else {
            OpenMode::ReadWrite
        }
    }

    pub fn can_read(self) -> bool {
        self != OpenMode::Write
    }

    pub fn can_write(self) -> bool {
        self != OpenMode::Read
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub mode: OpenMode,
    /// Truncate the file to zero length after opening it.
    pub truncate: bool,
    /// With `create`: fail if the file already exists.
    pub exclusive: bool,
}

impl OpenFlags {
    pub fn new(mode: OpenMode) -> Self {
        Self { mode, ..Default::default() }
    }

    pub fn truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockType {
    Read,
    Write,
    Unlock,
}

/// Byte-range lock request; a `len` of 0 extends to the end of the file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Flock {
    pub lock_type: LockType,
    pub start: u64,
    pub len: u64,
}

impl Flock {
    pub fn new(lock_type: LockType, start: u64, len: u64) -> Self {
        Self { lock_type, start, len }
    }

    /// NFSv4 length; all ones means "to the end of the file".
    pub fn length(&self) -> u64 {
        if self.len == 0 {
            u64::MAX
        } else {
            self.len
        }
    }

    pub fn nfs_lock_type(&self, blocking: bool) -> Result<nfs_lock_type4> {
        Ok(match (self.lock_type, blocking) {
            (LockType::Read, false) => nfs_lock_type4::READ_LT,
            (LockType::Read, true) => nfs_lock_type4::READW_LT,
            (LockType::Write, false) => nfs_lock_type4::WRITE_LT,
            (LockType::Write, true) => nfs_lock_type4::WRITEW_LT,
            (LockType::Unlock, _) => return Err(Error::InvalidArgument("unlock is not a lock type")),
        })
    }

    pub fn from_nfs(locktype: nfs_lock_type4, offset: u64, length: u64) -> Self {
        let lock_type = if locktype.is_write() { LockType::Write } else { LockType::Read };
        let len = if length == u64::MAX { 0 } else { length };
        Self { lock_type, start: offset, len }
    }
}

/// Fixed part of a packed directory entry: dev, ino and record length.
const DIRENT_HEADER: usize = 8 + 8 + 2;
const DIRENT_ALIGN: usize = 8;

/// Bytes a packed entry for `name` occupies.
pub fn dirent_size(name: &str) -> usize {
    (DIRENT_HEADER + name.len() + 1).next_multiple_of(DIRENT_ALIGN)
}

/// Packs `dirent` records (`dev: u64, ino: u64, reclen: u16, name\0`,
/// padded to 8 bytes) into a caller buffer.
#[derive(Debug)]
pub struct DirentWriter<'a> {
    buf: &'a mut [u8],
    used: usize,
    count: usize,
}

impl<'a> DirentWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, used: 0, count: 0 }
    }

    /// Appends one entry; returns `false` without writing if it does not fit.
    pub fn push(&mut self, dev: u64, ino: u64, name: &str) -> bool {
        let size = dirent_size(name);
        if self.used + size > self.buf.len() || size > u16::MAX as usize {
            return false;
        }
        let entry = &mut self.buf[self.used..self.used + size];
        NativeEndian::write_u64(&mut entry[0..8], dev);
        NativeEndian::write_u64(&mut entry[8..16], ino);
        NativeEndian::write_u16(&mut entry[16..18], size as u16);
        entry[DIRENT_HEADER..DIRENT_HEADER + name.len()].copy_from_slice(name.as_bytes());
        entry[DIRENT_HEADER + name.len()..].fill(0);
        self.used += size;
        self.count += 1;
        true
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn bytes_used(&self) -> usize {
        self.used
    }
}

/// One entry decoded from a packed dirent buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dirent {
    pub dev: u64,
    pub ino: u64,
    pub name: String,
}

/// Decodes the entries written by [DirentWriter].
pub fn parse_dirents(buf: &[u8]) -> Result<Vec<Dirent>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset + DIRENT_HEADER <= buf.len() {
        let entry = &buf[offset..];
        let reclen = NativeEndian::read_u16(&entry[16..18]) as usize;
        // Unused, zeroed tail of the buffer.
        if reclen == 0 {
            break;
        }
        if reclen < DIRENT_HEADER + 1 || reclen > entry.len() {
            return Err(Error::InvalidArgument("corrupt dirent buffer"));
        }
        let name = &entry[DIRENT_HEADER..reclen];
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        entries.push(Dirent {
            dev: NativeEndian::read_u64(&entry[0..8]),
            ino: NativeEndian::read_u64(&entry[8..16]),
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
        });
        offset += reclen;
    }
    Ok(entries)
}

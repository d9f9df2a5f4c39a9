//! XDR data types and constants for Network File System version 4.0, as
//! defined in RFC 7530.
//!
//! NFSv4 has a single interesting procedure, COMPOUND, which carries an
//! ordered list of operations. The argument and result bodies of the
//! individual operations live in the submodules, grouped the way they are
//! used by the client: [file] (open state, I/O, locks), [dir] (namespace
//! operations) and [client] (client id and lease). Attribute bitmaps and
//! values are in [attr].

#![allow(dead_code)]
#![allow(non_camel_case_types)]

use std::fmt;
use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::{deserialize, invalid_data, read_length, Deserialize, Serialize};
use super::{DeserializeEnum, SerializeEnum};
use crate::{DeserializeStruct, SerializeStruct};

pub mod attr;
pub mod client;
pub mod dir;
pub mod file;

pub use attr::{
    fattr4, AttrValue, Attribute, Bitmap, FH4_NOEXPIRE_WITH_OPEN, FH4_PERSISTENT, FH4_VOLATILE_ANY,
    FH4_VOL_MIGRATION, FH4_VOL_RENAME,
};

/// RPC program number of the NFS service.
pub const PROGRAM: u32 = 100003;
/// Protocol version implemented here.
pub const VERSION: u32 = 4;
/// COMPOUND minor version; 0 is NFSv4.0.
pub const MINOR_VERSION: u32 = 0;

/// Maximum size in bytes of a file handle.
pub const NFS4_FHSIZE: usize = 128;
/// Size in bytes of the verifiers used by WRITE, COMMIT, READDIR and SETCLIENTID.
pub const NFS4_VERIFIER_SIZE: usize = 8;
/// Size in bytes of the `other` field of a stateid.
pub const NFS4_OTHER_SIZE: usize = 12;
/// Upper bound for opaque owner strings.
pub const NFS4_OPAQUE_LIMIT: usize = 1024;

/// Procedures of the NFSv4 program.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum nfs_proc4 {
    /// Ping; no arguments and no results.
    NFSPROC4_NULL = 0,
    /// Batch of operations evaluated in order until the first failure.
    NFSPROC4_COMPOUND = 1,
}

/// Operation numbers inside a COMPOUND.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_opnum4 {
    OP_ACCESS = 3,
    OP_CLOSE = 4,
    OP_COMMIT = 5,
    OP_CREATE = 6,
    OP_DELEGPURGE = 7,
    OP_DELEGRETURN = 8,
    OP_GETATTR = 9,
    OP_GETFH = 10,
    OP_LINK = 11,
    OP_LOCK = 12,
    OP_LOCKT = 13,
    OP_LOCKU = 14,
    OP_LOOKUP = 15,
    OP_LOOKUPP = 16,
    OP_NVERIFY = 17,
    OP_OPEN = 18,
    OP_OPENATTR = 19,
    OP_OPEN_CONFIRM = 20,
    OP_OPEN_DOWNGRADE = 21,
    OP_PUTFH = 22,
    OP_PUTPUBFH = 23,
    OP_PUTROOTFH = 24,
    OP_READ = 25,
    OP_READDIR = 26,
    OP_READLINK = 27,
    OP_REMOVE = 28,
    OP_RENAME = 29,
    OP_RENEW = 30,
    OP_RESTOREFH = 31,
    OP_SAVEFH = 32,
    OP_SECINFO = 33,
    OP_SETATTR = 34,
    OP_SETCLIENTID = 35,
    OP_SETCLIENTID_CONFIRM = 36,
    OP_VERIFY = 37,
    OP_WRITE = 38,
    OP_RELEASE_LOCKOWNER = 39,
    #[default]
    OP_ILLEGAL = 10044,
}
impl SerializeEnum for nfs_opnum4 {}
impl DeserializeEnum for nfs_opnum4 {}

/// Status codes of COMPOUND and of every operation inside it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat4 {
    #[default]
    NFS4_OK = 0,
    NFS4ERR_PERM = 1,
    NFS4ERR_NOENT = 2,
    NFS4ERR_IO = 5,
    NFS4ERR_NXIO = 6,
    NFS4ERR_ACCESS = 13,
    NFS4ERR_EXIST = 17,
    NFS4ERR_XDEV = 18,
    NFS4ERR_NOTDIR = 20,
    NFS4ERR_ISDIR = 21,
    NFS4ERR_INVAL = 22,
    NFS4ERR_FBIG = 27,
    NFS4ERR_NOSPC = 28,
    NFS4ERR_ROFS = 30,
    NFS4ERR_MLINK = 31,
    NFS4ERR_NAMETOOLONG = 63,
    NFS4ERR_NOTEMPTY = 66,
    NFS4ERR_DQUOT = 69,
    NFS4ERR_STALE = 70,
    NFS4ERR_BADHANDLE = 10001,
    NFS4ERR_BAD_COOKIE = 10003,
    NFS4ERR_NOTSUPP = 10004,
    NFS4ERR_TOOSMALL = 10005,
    NFS4ERR_SERVERFAULT = 10006,
    NFS4ERR_BADTYPE = 10007,
    /// The server wants the request retried later.
    NFS4ERR_DELAY = 10008,
    NFS4ERR_SAME = 10009,
    /// Lock conflict; LOCK and LOCKT return the conflicting range.
    NFS4ERR_DENIED = 10010,
    NFS4ERR_EXPIRED = 10011,
    NFS4ERR_LOCKED = 10012,
    /// Server is in its grace period and only accepts reclaims.
    NFS4ERR_GRACE = 10013,
    /// Volatile file handle expired.
    NFS4ERR_FHEXPIRED = 10014,
    NFS4ERR_SHARE_DENIED = 10015,
    NFS4ERR_WRONGSEC = 10016,
    NFS4ERR_CLID_INUSE = 10017,
    NFS4ERR_RESOURCE = 10018,
    NFS4ERR_MOVED = 10019,
    NFS4ERR_NOFILEHANDLE = 10020,
    NFS4ERR_MINOR_VERS_MISMATCH = 10021,
    NFS4ERR_STALE_CLIENTID = 10022,
    NFS4ERR_STALE_STATEID = 10023,
    NFS4ERR_OLD_STATEID = 10024,
    NFS4ERR_BAD_STATEID = 10025,
    NFS4ERR_BAD_SEQID = 10026,
    NFS4ERR_NOT_SAME = 10027,
    NFS4ERR_LOCK_RANGE = 10028,
    NFS4ERR_SYMLINK = 10029,
    NFS4ERR_RESTOREFH = 10030,
    NFS4ERR_LEASE_MOVED = 10031,
    NFS4ERR_ATTRNOTSUPP = 10032,
    NFS4ERR_NO_GRACE = 10033,
    NFS4ERR_RECLAIM_BAD = 10034,
    NFS4ERR_RECLAIM_CONFLICT = 10035,
    NFS4ERR_BADXDR = 10036,
    NFS4ERR_LOCKS_HELD = 10037,
    NFS4ERR_OPENMODE = 10038,
    NFS4ERR_BADOWNER = 10039,
    NFS4ERR_BADCHAR = 10040,
    NFS4ERR_BADNAME = 10041,
    NFS4ERR_BAD_RANGE = 10042,
    NFS4ERR_LOCK_NOTSUPP = 10043,
    NFS4ERR_OP_ILLEGAL = 10044,
    NFS4ERR_DEADLOCK = 10045,
    NFS4ERR_FILE_OPEN = 10046,
    NFS4ERR_ADMIN_REVOKED = 10047,
    NFS4ERR_CB_PATH_DOWN = 10048,
}
impl SerializeEnum for nfsstat4 {}

/// Unknown status values are reported as a server fault rather than as a
/// decoding error, so a newer server never makes a reply unreadable.
impl Deserialize for nfsstat4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let code = deserialize::<u32>(src)?;
        *self = nfsstat4::from_u32(code).unwrap_or(nfsstat4::NFS4ERR_SERVERFAULT);
        Ok(())
    }
}

impl nfsstat4 {
    pub fn is_ok(self) -> bool {
        self == nfsstat4::NFS4_OK
    }
}

impl fmt::Display for nfsstat4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u32)
    }
}

/// Object types.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_ftype4 {
    #[default]
    NF4REG = 1,
    NF4DIR = 2,
    NF4BLK = 3,
    NF4CHR = 4,
    NF4LNK = 5,
    NF4SOCK = 6,
    NF4FIFO = 7,
    NF4ATTRDIR = 8,
    NF4NAMEDATTR = 9,
}
impl SerializeEnum for nfs_ftype4 {}
impl DeserializeEnum for nfs_ftype4 {}

/// Opaque, server-defined identifier of a filesystem object.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct nfs_fh4 {
    pub data: Vec<u8>,
}

impl nfs_fh4 {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for nfs_fh4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fh(")?;
        for b in &self.data {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl Serialize for nfs_fh4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        if self.data.len() > NFS4_FHSIZE {
            return Err(invalid_data("file handle longer than NFS4_FHSIZE"));
        }
        self.data.serialize(dest)
    }
}

impl Deserialize for nfs_fh4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.data.deserialize(src)?;
        if self.data.len() > NFS4_FHSIZE {
            return Err(invalid_data("file handle longer than NFS4_FHSIZE"));
        }
        Ok(())
    }
}

pub type verifier4 = [u8; NFS4_VERIFIER_SIZE];
pub type clientid4 = u64;
pub type seqid4 = u32;
pub type offset4 = u64;
pub type length4 = u64;
pub type count4 = u32;
pub type changeid4 = u64;
pub type nfs_cookie4 = u64;

/// Server state token naming an open, a lock or a delegation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct stateid4 {
    pub seqid: u32,
    pub other: [u8; NFS4_OTHER_SIZE],
}
SerializeStruct!(stateid4, seqid, other);
DeserializeStruct!(stateid4, seqid, other);

impl stateid4 {
    /// The all-zeros "anonymous" stateid.
    pub const ANONYMOUS: stateid4 = stateid4 { seqid: 0, other: [0; NFS4_OTHER_SIZE] };
}

/// Directory change counters reported by operations that modify a directory.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct change_info4 {
    /// True if `before` and `after` bracket exactly this operation.
    pub atomic: bool,
    pub before: changeid4,
    pub after: changeid4,
}
SerializeStruct!(change_info4, atomic, before, after);
DeserializeStruct!(change_info4, atomic, before, after);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct fsid4 {
    pub major: u64,
    pub minor: u64,
}
SerializeStruct!(fsid4, major, minor);
DeserializeStruct!(fsid4, major, minor);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct nfstime4 {
    pub seconds: i64,
    pub nseconds: u32,
}
SerializeStruct!(nfstime4, seconds, nseconds);
DeserializeStruct!(nfstime4, seconds, nseconds);

impl From<nfstime4> for filetime::FileTime {
    fn from(time: nfstime4) -> Self {
        filetime::FileTime::from_unix_time(time.seconds, time.nseconds)
    }
}

impl From<filetime::FileTime> for nfstime4 {
    fn from(time: filetime::FileTime) -> Self {
        nfstime4 { seconds: time.unix_seconds(), nseconds: time.nanoseconds() }
    }
}

/// Time value for settable time attributes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum settime4 {
    #[default]
    SET_TO_SERVER_TIME4,
    SET_TO_CLIENT_TIME4(nfstime4),
}

impl Serialize for settime4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            settime4::SET_TO_SERVER_TIME4 => 0_u32.serialize(dest),
            settime4::SET_TO_CLIENT_TIME4(time) => {
                1_u32.serialize(dest)?;
                time.serialize(dest)
            }
        }
    }
}

impl Deserialize for settime4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => settime4::SET_TO_SERVER_TIME4,
            1 => settime4::SET_TO_CLIENT_TIME4(deserialize(src)?),
            how => return Err(invalid_data(&format!("invalid time_how4 {how}"))),
        };
        Ok(())
    }
}

/// Open and lock owner: the client id plus an opaque client-chosen name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct state_owner4 {
    pub clientid: clientid4,
    pub owner: Vec<u8>,
}
SerializeStruct!(state_owner4, clientid, owner);

impl Deserialize for state_owner4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.clientid.deserialize(src)?;
        let len = read_length(&mut *src, NFS4_OPAQUE_LIMIT)?;
        let mut owner = vec![0u8; len];
        src.read_exact(&mut owner)?;
        super::utils::read_padding(len, src)?;
        self.owner = owner;
        Ok(())
    }
}

pub type open_owner4 = state_owner4;
pub type lock_owner4 = state_owner4;

/// Header of the COMPOUND arguments; operations follow.
#[derive(Clone, Debug, Default)]
pub struct COMPOUND4args_header {
    pub tag: String,
    pub minorversion: u32,
    pub numops: u32,
}
SerializeStruct!(COMPOUND4args_header, tag, minorversion, numops);
DeserializeStruct!(COMPOUND4args_header, tag, minorversion, numops);

/// Header of the COMPOUND results; per-operation results follow.
#[derive(Clone, Debug, Default)]
pub struct COMPOUND4res_header {
    pub status: nfsstat4,
    pub tag: String,
    pub numres: u32,
}
SerializeStruct!(COMPOUND4res_header, status, tag, numres);
DeserializeStruct!(COMPOUND4res_header, status, tag, numres);

//! Crate-wide error type.
//!
//! NFSv4 status codes are folded into a small set of local conditions in
//! [`From<nfsstat4>`]; codes without a local meaning are kept verbatim in
//! [`Error::Nfs`].

use std::io;

use crate::protocol::xdr::nfs4::nfsstat4;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport was cancelled or reconnected while waiting.
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("out of memory")]
    OutOfMemory,
    #[error("I/O error: {0}")]
    Io(io::Error),
    #[error("operation timed out")]
    TimedOut,

    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("no space left on device")]
    NoSpace,
    #[error("stale file handle")]
    StaleHandle,
    #[error("permission denied")]
    AccessDenied,
    #[error("operation not permitted")]
    NotPermitted,
    /// A conflicting lock is held.
    #[error("operation would block")]
    WouldBlock,
    /// The server asked us to come back later.
    #[error("request deferred by server")]
    Deferred,
    #[error("operation not supported")]
    Unsupported,
    #[error("server fault")]
    ServerFault,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("file name too long")]
    NameTooLong,
    #[error("read-only file system")]
    ReadOnly,
    #[error("file too large")]
    FileTooBig,
    #[error("NFS error {0}")]
    Nfs(nfsstat4),

    /// The caller's buffer cannot hold even one more entry.
    #[error("buffer too small")]
    BufferOverflow,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("not a directory")]
    NotADirectory,
    #[error("malformed reply: {0}")]
    BadXdr(String),
    #[error("RPC error: {0}")]
    Rpc(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Error::BadXdr(err.to_string())
            }
            io::ErrorKind::ConnectionAborted => Error::ConnectionAborted,
            io::ErrorKind::TimedOut => Error::TimedOut,
            io::ErrorKind::OutOfMemory => Error::OutOfMemory,
            _ => Error::Io(err),
        }
    }
}

impl From<nfsstat4> for Error {
    fn from(status: nfsstat4) -> Self {
        use nfsstat4::*;
        match status {
            NFS4ERR_NOENT => Error::NotFound,
            NFS4ERR_EXIST => Error::AlreadyExists,
            NFS4ERR_NOSPC | NFS4ERR_DQUOT => Error::NoSpace,
            NFS4ERR_STALE | NFS4ERR_BADHANDLE | NFS4ERR_FHEXPIRED => Error::StaleHandle,
            NFS4ERR_ACCESS | NFS4ERR_SHARE_DENIED | NFS4ERR_WRONGSEC => Error::AccessDenied,
            NFS4ERR_PERM => Error::NotPermitted,
            NFS4ERR_DENIED | NFS4ERR_LOCKED | NFS4ERR_DEADLOCK => Error::WouldBlock,
            NFS4ERR_DELAY | NFS4ERR_GRACE => Error::Deferred,
            NFS4ERR_NOTSUPP | NFS4ERR_ATTRNOTSUPP | NFS4ERR_LOCK_NOTSUPP | NFS4ERR_OP_ILLEGAL => {
                Error::Unsupported
            }
            NFS4ERR_SERVERFAULT | NFS4ERR_IO | NFS4ERR_NXIO => Error::ServerFault,
            NFS4ERR_ISDIR => Error::IsADirectory,
            NFS4ERR_NOTDIR => Error::NotADirectory,
            NFS4ERR_NOTEMPTY => Error::DirectoryNotEmpty,
            NFS4ERR_NAMETOOLONG => Error::NameTooLong,
            NFS4ERR_ROFS => Error::ReadOnly,
            NFS4ERR_FBIG => Error::FileTooBig,
            NFS4ERR_INVAL | NFS4ERR_BADNAME | NFS4ERR_BADCHAR => {
                Error::InvalidArgument("rejected by server")
            }
            NFS4ERR_BADXDR => Error::BadXdr("server could not decode the request".into()),
            other => Error::Nfs(other),
        }
    }
}

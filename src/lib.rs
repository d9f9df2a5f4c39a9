//! NFS4 Client - the core of an NFS version 4.0 client in Rust
//!
//! This library turns file operations (lookup, open, read, write, readdir,
//! link, rename, lock) into NFSv4 COMPOUND requests, keeps the transport to
//! the server alive and holds the client-side state the protocol requires:
//! the client id and its lease, open and lock stateids, and caches for
//! attributes and directory contents that are checked against the server's
//! change counters.
//!
//! ## Main Components
//!
//! - `connection`: TCP and UDP transports with cancellable receive and
//!   reconnection, record marking, and a listener for inbound connections.
//!
//! - `protocol`: XDR encoding, ONC RPC call/reply handling and the NFSv4
//!   COMPOUND encoder (`RequestBuilder`) and decoder (`ReplyInterpreter`).
//!
//! - `client`: client id establishment, lease renewal and state recovery.
//!
//! - `file_system`: one mounted export: supported attributes, the inode
//!   table and the registry of open files.
//!
//! - `inode`: per-object operations as seen by a virtual file system layer.
//!
//! - `vfs`: plain types crossing that boundary (`Stat`, `OpenFlags`,
//!   `Flock`, packed directory entries).
//!
//! ## Standards Compliance
//!
//! - RFC 7530: Network File System (NFS) Version 4 Protocol
//! - RFC 5531: RPC: Remote Procedure Call Protocol Specification Version 2
//! - RFC 4506: XDR: External Data Representation Standard
//!
//! ## Usage
//!
//! Connect an [Nfs4Client] to a server, mount an export to get a
//! [FileSystem], then walk it from [FileSystem::root].

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod client;
pub mod config;
pub mod connection;
pub mod dir_cache;
pub mod error;
pub mod file_system;
pub mod inode;
pub mod open_state;
pub mod protocol;
pub mod vfs;

pub use client::Nfs4Client;
pub use config::MountOptions;
pub use error::{Error, Result};
pub use file_system::{FileInfo, FileSystem};
pub use inode::Inode;
pub use protocol::xdr;

/// Locks `mutex`, carrying on with the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

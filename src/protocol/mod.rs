//! Wire protocols spoken by the client.
//!
//! - `xdr`: External Data Representation (RFC 4506) traits plus the ONC RPC
//!   and NFSv4 message types built on them.
//! - `rpc`: the RPC call/reply endpoint on top of a transport connection.
//! - `nfs4`: COMPOUND request encoder and reply decoder.

pub mod nfs4;
pub mod rpc;
pub mod xdr;

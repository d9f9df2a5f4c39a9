//! ONC RPC version 2 client endpoint (RFC 5531).
//!
//! A [Server] wraps one [Connection](crate::connection::Connection) and
//! turns it into a call/reply service:
//!
//! 1. every call gets a fresh transaction id (xid);
//! 2. a single listener task owns `receive` and hands each reply to the
//!    caller waiting on its xid;
//! 3. a call that sees no reply within the timeout is retransmitted with the
//!    same xid, so the server's duplicate request cache can recognise it;
//! 4. a transport failure seen by the listener triggers a reconnect, after
//!    which outstanding calls recover through retransmission.

mod server;

pub use server::Server;

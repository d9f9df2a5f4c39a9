//! NFSv4 COMPOUND encoding and decoding.
//!
//! [RequestBuilder] appends operations to one COMPOUND request;
//! [ReplyInterpreter] walks the matching reply. Results must be read back in
//! the order the operations were added, and the first failed operation ends
//! the reply: every accessor after it returns the same error.

mod reply;
mod request;

pub use reply::ReplyInterpreter;
pub use request::{RequestBuilder, READDIR_DIRCOUNT, READDIR_MAXCOUNT};

//! Types shared by the rknfs client and the rknfsd server.
//!
//! Every remote procedure is one `NfsRequest` sent on its own stream and
//! answered by exactly one `NfsResponse`. Both are encoded with bincode, see
//! [`codec`].

pub mod codec;
pub mod protocol;

pub use codec::{MAX_IO_SIZE, MAX_MESSAGE_SIZE, decode_message, encode_message};
pub use protocol::*;

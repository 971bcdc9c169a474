//! Client side of rknfs.
//!
//! [`NfsSession`] is the entry point: it resolves paths to server handles,
//! retries calls that fail on the wire and keeps unstable writes until a
//! COMMIT proves the server did not restart in between.

pub mod adapter;
pub mod error;
pub mod handle_cache;
pub mod retry;
pub mod session;
pub mod transport;
pub mod write_buffer;

pub use adapter::RemoteFs;
pub use error::{ClientError, TransportError};
pub use retry::{RetryPolicy, RetryingCaller};
pub use session::{CommitOutcome, NfsSession};
pub use transport::{QuicTransport, Transport};

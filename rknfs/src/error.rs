use std::time::Duration;

use common::{NfsStatus, Procedure};

/// Return code for a successful operation.
pub const CODE_OK: i32 = 0;
/// Return code for any remote or transport failure.
pub const CODE_FAILURE: i32 = -1;
/// Return code when the object does not exist on the server.
pub const CODE_NOT_FOUND: i32 = -2;

/// A single attempt failed to produce a reply.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("cannot reach {addr}: {reason}")]
    Unreachable { addr: String, reason: String },
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("malformed message: {0}")]
    Codec(String),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// The request itself cannot be put on the wire; sending it again
    /// would fail the same way.
    #[error("request cannot be encoded: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Encode(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("object not found on server")]
    NotFound,
    #[error("{procedure} failed on server: {status}")]
    Remote {
        procedure: Procedure,
        status: NfsStatus,
    },
    #[error("{procedure} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        procedure: Procedure,
        attempts: u32,
        last: TransportError,
    },
    #[error("{procedure} cannot be sent: {source}")]
    NotRetryable {
        procedure: Procedure,
        #[source]
        source: TransportError,
    },
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: u32 },
    #[error("unexpected reply to {procedure}: {reply}")]
    UnexpectedReply { procedure: Procedure, reply: String },
    #[error("replaying buffered writes of {path} failed at offset {offset}: {source}")]
    ReplayFailed {
        path: String,
        offset: u64,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    pub fn from_status(procedure: Procedure, status: NfsStatus) -> Self {
        match status {
            NfsStatus::NotFound => ClientError::NotFound,
            status => ClientError::Remote { procedure, status },
        }
    }

    /// Maps the error onto the 0 / -1 / -2 return convention.
    pub fn code(&self) -> i32 {
        match self {
            ClientError::NotFound => CODE_NOT_FOUND,
            _ => CODE_FAILURE,
        }
    }
}

/// Collapses a result into a return code.
pub fn code_of<T>(result: &Result<T, ClientError>) -> i32 {
    match result {
        Ok(_) => CODE_OK,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_codes() {
        assert_eq!(code_of::<()>(&Ok(())), 0);
        assert_eq!(ClientError::NotFound.code(), -2);
        let remote = ClientError::from_status(Procedure::Mkdir, NfsStatus::Exists);
        assert_eq!(remote.code(), -1);
        let missing = ClientError::from_status(Procedure::GetAttr, NfsStatus::NotFound);
        assert!(matches!(missing, ClientError::NotFound));

        let exhausted = ClientError::RetriesExhausted {
            procedure: Procedure::Read,
            attempts: 3,
            last: TransportError::Timeout(Duration::from_millis(5)),
        };
        assert_eq!(exhausted.code(), -1);
        assert!(exhausted.to_string().contains("READ gave up after 3 attempts"));
    }

    #[test]
    fn test_only_encode_errors_are_final() {
        assert!(!TransportError::Encode("too big".to_string()).is_retryable());
        assert!(TransportError::Codec("eof".to_string()).is_retryable());
        assert!(TransportError::Timeout(Duration::from_millis(1)).is_retryable());
        let err = ClientError::PayloadTooLarge { len: 10, max: 4 };
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn test_replay_failure_is_generic() {
        let err = ClientError::ReplayFailed {
            path: "/a".to_string(),
            offset: 4,
            source: Box::new(ClientError::NotFound),
        };
        assert_eq!(err.code(), -1);
    }
}

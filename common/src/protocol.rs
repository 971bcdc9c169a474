use std::fmt;
use std::num::ParseIntError;

use serde::{Deserialize, Serialize};

/// Opaque handle of a server object: the decimal inode number of the object
/// under the server root.
///
/// There is no generation number, so a handle goes stale (or silently aliases
/// a new object) once the inode is reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle(String);

impl FileHandle {
    pub fn from_ino(ino: u64) -> Self {
        FileHandle(ino.to_string())
    }

    pub fn ino(&self) -> Result<u64, ParseIntError> {
        self.0.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FileHandle {
    fn from(s: String) -> Self {
        FileHandle(s)
    }
}

impl From<&str> for FileHandle {
    fn from(s: &str) -> Self {
        FileHandle(s.to_string())
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one incarnation of the server process.
///
/// Every WRITE and COMMIT reply carries it. A client that sees a different
/// verifier on COMMIT than on its earlier unstable WRITEs knows the server
/// restarted in between and that the buffered data may be lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteVerifier(pub u64);

impl WriteVerifier {
    /// Verifier derived from the current wall clock in milliseconds.
    pub fn from_start_time() -> Self {
        WriteVerifier(chrono::Utc::now().timestamp_millis() as u64)
    }
}

impl fmt::Display for WriteVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durability requested by a WRITE, and reported back as the committed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StableHow {
    /// Acknowledged once queued; needs a COMMIT to become durable.
    Unstable,
    /// Written and flushed before the reply is sent.
    DataSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Directory,
    Regular,
    Other,
}

/// Timestamps are whole seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    pub file_type: FileType,
    pub mode: u32,
    pub size: u64,
    pub fileid: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// Failure reported by a server handler. Transport problems never show up
/// here; they are the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum NfsStatus {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    Exists,
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NfsRequest {
    Lookup {
        path: String,
    },
    GetAttr {
        handle: FileHandle,
    },
    SetAttr {
        handle: FileHandle,
        size: u64,
    },
    Read {
        handle: FileHandle,
        offset: u64,
        count: u32,
    },
    Write {
        handle: FileHandle,
        offset: u64,
        count: u32,
        data: Vec<u8>,
        stable: StableHow,
    },
    // offset and count are informational, the whole file is committed
    Commit {
        handle: FileHandle,
        offset: u64,
        count: u32,
    },
    Mkdir {
        path: String,
        mode: u32,
    },
    Rmdir {
        handle: FileHandle,
    },
    Create {
        path: String,
        mode: u32,
    },
    Remove {
        handle: FileHandle,
    },
}

impl NfsRequest {
    pub fn procedure(&self) -> Procedure {
        match self {
            NfsRequest::Lookup { .. } => Procedure::Lookup,
            NfsRequest::GetAttr { .. } => Procedure::GetAttr,
            NfsRequest::SetAttr { .. } => Procedure::SetAttr,
            NfsRequest::Read { .. } => Procedure::Read,
            NfsRequest::Write { .. } => Procedure::Write,
            NfsRequest::Commit { .. } => Procedure::Commit,
            NfsRequest::Mkdir { .. } => Procedure::Mkdir,
            NfsRequest::Rmdir { .. } => Procedure::Rmdir,
            NfsRequest::Create { .. } => Procedure::Create,
            NfsRequest::Remove { .. } => Procedure::Remove,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Procedure {
    Lookup,
    GetAttr,
    SetAttr,
    Read,
    Write,
    Commit,
    Mkdir,
    Rmdir,
    Create,
    Remove,
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Procedure::Lookup => "LOOKUP",
            Procedure::GetAttr => "GETATTR",
            Procedure::SetAttr => "SETATTR",
            Procedure::Read => "READ",
            Procedure::Write => "WRITE",
            Procedure::Commit => "COMMIT",
            Procedure::Mkdir => "MKDIR",
            Procedure::Rmdir => "RMDIR",
            Procedure::Create => "CREATE",
            Procedure::Remove => "REMOVE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NfsResponse {
    Handle(FileHandle),
    Attr(FileAttr),
    Data {
        data: Vec<u8>,
        count: u32,
    },
    Written {
        count: u32,
        verifier: WriteVerifier,
        committed: StableHow,
    },
    Committed {
        verifier: WriteVerifier,
    },
    Ack,
    Failure(NfsStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_decimal_inode() {
        let fh = FileHandle::from_ino(12345);
        assert_eq!(fh.as_str(), "12345");
        assert_eq!(fh.ino().unwrap(), 12345);
        assert!(FileHandle::from("not-an-inode").ino().is_err());
    }

    #[test]
    fn test_procedure_names() {
        let req = NfsRequest::Commit {
            handle: FileHandle::from_ino(1),
            offset: 0,
            count: 0,
        };
        assert_eq!(req.procedure(), Procedure::Commit);
        assert_eq!(req.procedure().to_string(), "COMMIT");
    }
}

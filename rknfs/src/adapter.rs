//! Filesystem-callback shaped front end over an [`NfsSession`].
//!
//! Every method answers with the return convention of a mount adapter:
//! `0` (or a byte count) on success, `-1` for any remote or transport
//! failure and `-2` when the server has no such object. Directory listings
//! are not remoted; `readdir` lists the local directory it is given.

use std::io;
use std::path::Path;

use common::FileAttr;
use log::debug;

use crate::error::{CODE_FAILURE, CODE_NOT_FOUND, CODE_OK, ClientError, code_of};
use crate::session::NfsSession;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub struct RemoteFs<T> {
    session: NfsSession<T>,
}

fn len_code(result: Result<usize, ClientError>) -> i32 {
    match result {
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(e) => e.code(),
    }
}

impl<T: Transport> RemoteFs<T> {
    pub fn new(session: NfsSession<T>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &NfsSession<T> {
        &self.session
    }

    pub async fn getattr(&self, path: &str) -> Result<FileAttr, i32> {
        self.session.getattr(path).await.map_err(|e| e.code())
    }

    /// Permissions are not modelled; access only checks that the path exists.
    pub async fn access(&self, path: &str) -> i32 {
        code_of(&self.session.lookup(path).await)
    }

    pub fn readdir(&self, dir: &Path) -> Result<Vec<DirEntry>, i32> {
        let io_code = |e: io::Error| match e.kind() {
            io::ErrorKind::NotFound => CODE_NOT_FOUND,
            _ => CODE_FAILURE,
        };
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_code)? {
            let entry = entry.map_err(io_code)?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> i32 {
        code_of(&self.session.mkdir(path, mode).await)
    }

    pub async fn unlink(&self, path: &str) -> i32 {
        code_of(&self.session.remove(path).await)
    }

    pub async fn rmdir(&self, path: &str) -> i32 {
        code_of(&self.session.rmdir(path).await)
    }

    pub async fn truncate(&self, path: &str, size: u64) -> i32 {
        code_of(&self.session.setattr(path, size).await)
    }

    pub async fn open(&self, path: &str) -> i32 {
        code_of(&self.session.lookup(path).await)
    }

    pub async fn create(&self, path: &str, mode: u32) -> i32 {
        code_of(&self.session.create(path, mode).await)
    }

    /// Fills `buf` from `offset`; returns the number of bytes read.
    pub async fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> i32 {
        let count = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let result = self.session.read(path, offset, count).await.map(|data| {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            n
        });
        len_code(result)
    }

    /// Unstable write; durable after `release` or `fsync`.
    pub async fn write(&self, path: &str, data: &[u8], offset: u64) -> i32 {
        let result = self
            .session
            .write(path, offset, data)
            .await
            .map(|n| n as usize);
        len_code(result)
    }

    pub async fn release(&self, path: &str) -> i32 {
        self.flush(path).await
    }

    pub async fn fsync(&self, path: &str) -> i32 {
        self.flush(path).await
    }

    async fn flush(&self, path: &str) -> i32 {
        match self.session.commit(path).await {
            Ok(outcome) => {
                debug!("flushed {path}: {outcome:?}");
                CODE_OK
            }
            Err(e) => e.code(),
        }
    }
}

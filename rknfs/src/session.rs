use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{
    FileAttr, FileHandle, MAX_IO_SIZE, NfsRequest, NfsResponse, Procedure, StableHow,
    WriteVerifier,
};
use log::{debug, info, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::ClientError;
use crate::handle_cache::FileHandleCache;
use crate::retry::{RetryPolicy, RetryingCaller};
use crate::transport::Transport;
use crate::write_buffer::WriteBuffer;

/// What a COMMIT ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing was buffered for the path; no request was sent.
    NothingBuffered,
    /// The server kept running since the writes; the buffer was dropped.
    ConfirmedDurable,
    /// The server restarted; this many buffered writes were sent again as
    /// stable writes.
    Replayed { count: usize },
}

/// All client state for one server: the caller, the handle cache and the
/// write buffer. Safe to share between tasks.
///
/// Unstable writes and commits of the same path are serialized, so a commit
/// never sees a record whose WRITE reply is still outstanding.
pub struct NfsSession<T> {
    caller: RetryingCaller<T>,
    handles: FileHandleCache,
    buffer: WriteBuffer,
    path_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

fn check_payload(data: &[u8]) -> Result<(), ClientError> {
    if data.len() > MAX_IO_SIZE as usize {
        return Err(ClientError::PayloadTooLarge {
            len: data.len(),
            max: MAX_IO_SIZE,
        });
    }
    Ok(())
}

fn unexpected(procedure: Procedure, reply: NfsResponse) -> ClientError {
    match reply {
        NfsResponse::Failure(status) => ClientError::from_status(procedure, status),
        other => ClientError::UnexpectedReply {
            procedure,
            reply: format!("{other:?}"),
        },
    }
}

impl<T: Transport> NfsSession<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            caller: RetryingCaller::new(transport, policy),
            handles: FileHandleCache::new(),
            buffer: WriteBuffer::new(),
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_path(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = match self.path_locks.lock() {
            Ok(mut locks) => locks.entry(path.to_string()).or_default().clone(),
            // poisoned map: fall back to an unshared lock
            Err(_) => Arc::new(AsyncMutex::new(())),
        };
        lock.lock_owned().await
    }

    pub fn transport(&self) -> &T {
        self.caller.transport()
    }

    pub fn handles(&self) -> &FileHandleCache {
        &self.handles
    }

    /// Unstable writes for `path` that are still waiting for a COMMIT.
    pub fn buffered(&self, path: &str) -> usize {
        self.buffer.pending(path)
    }

    pub async fn lookup(&self, path: &str) -> Result<FileHandle, ClientError> {
        self.handles.resolve(&self.caller, path).await
    }

    pub async fn getattr(&self, path: &str) -> Result<FileAttr, ClientError> {
        let handle = self.lookup(path).await?;
        match self.caller.call(&NfsRequest::GetAttr { handle }).await? {
            NfsResponse::Attr(attr) => Ok(attr),
            other => Err(unexpected(Procedure::GetAttr, other)),
        }
    }

    pub async fn setattr(&self, path: &str, size: u64) -> Result<(), ClientError> {
        let handle = self.lookup(path).await?;
        self.expect_ack(NfsRequest::SetAttr { handle, size }).await
    }

    pub async fn read(&self, path: &str, offset: u64, count: u32) -> Result<Vec<u8>, ClientError> {
        let handle = self.lookup(path).await?;
        let req = NfsRequest::Read {
            handle,
            offset,
            count,
        };
        match self.caller.call(&req).await? {
            NfsResponse::Data { mut data, count } => {
                data.truncate(count as usize);
                Ok(data)
            }
            other => Err(unexpected(Procedure::Read, other)),
        }
    }

    /// Unstable write: the server only queues it, and the data stays in the
    /// local buffer until the next [`commit`](Self::commit) of `path`.
    pub async fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<u32, ClientError> {
        check_payload(data)?;
        let handle = self.lookup(path).await?;
        let _guard = self.lock_path(path).await;
        let id = self.buffer.record(path, offset, data);
        match self
            .send_write(handle, offset, data, StableHow::Unstable)
            .await
        {
            Ok((count, verifier)) => {
                self.buffer.set_verifier(path, verifier);
                Ok(count)
            }
            Err(e) => {
                self.buffer.withdraw(path, id);
                Err(e)
            }
        }
    }

    /// Stable write: durable on the server before this returns. Not buffered.
    pub async fn write_stable(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<u32, ClientError> {
        check_payload(data)?;
        let handle = self.lookup(path).await?;
        let (count, _) = self
            .send_write(handle, offset, data, StableHow::DataSync)
            .await?;
        Ok(count)
    }

    /// Makes every buffered write of `path` durable.
    ///
    /// If the verifier in the COMMIT reply differs from the one the unstable
    /// writes saw, the server lost its queue in a restart and the records are
    /// replayed in issue order as stable writes. The first failing replay
    /// aborts the rest.
    ///
    /// Once the server has answered the COMMIT, success or failure, the
    /// buffer of `path` is empty. Only a COMMIT that never got a reply
    /// (retries exhausted) leaves it in place for a later attempt.
    pub async fn commit(&self, path: &str) -> Result<CommitOutcome, ClientError> {
        let _guard = self.lock_path(path).await;
        if self.buffer.is_empty(path) {
            return Ok(CommitOutcome::NothingBuffered);
        }
        let handle = self.lookup(path).await?;
        let req = NfsRequest::Commit {
            handle: handle.clone(),
            offset: 0,
            count: 0,
        };
        let reply = self.caller.call(&req).await?;
        let buffered = self.buffer.take(path);
        let verifier = match reply {
            NfsResponse::Committed { verifier } => verifier,
            other => {
                warn!(
                    "COMMIT {path} failed, dropping {} buffered writes",
                    buffered.records.len()
                );
                return Err(unexpected(Procedure::Commit, other));
            }
        };

        if buffered.records.is_empty() {
            return Ok(CommitOutcome::NothingBuffered);
        }
        if buffered.verifier == Some(verifier) {
            debug!("COMMIT {path}: verifier {verifier} unchanged");
            return Ok(CommitOutcome::ConfirmedDurable);
        }

        warn!(
            "COMMIT {path}: server verifier changed ({} -> {verifier}), replaying {} writes",
            buffered
                .verifier
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string()),
            buffered.records.len()
        );
        let count = buffered.records.len();
        for record in buffered.records {
            if let Err(e) = self
                .send_write(handle.clone(), record.offset, &record.data, StableHow::DataSync)
                .await
            {
                warn!("replay of {path} at offset {} failed: {e}", record.offset);
                return Err(ClientError::ReplayFailed {
                    path: path.to_string(),
                    offset: record.offset,
                    source: Box::new(e),
                });
            }
        }
        info!("COMMIT {path}: replayed {count} writes");
        Ok(CommitOutcome::Replayed { count })
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<(), ClientError> {
        self.expect_ack(NfsRequest::Mkdir {
            path: path.to_string(),
            mode,
        })
        .await
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), ClientError> {
        let handle = self.lookup(path).await?;
        self.expect_ack(NfsRequest::Rmdir { handle }).await?;
        self.handles.forget(path);
        Ok(())
    }

    pub async fn create(&self, path: &str, mode: u32) -> Result<(), ClientError> {
        self.expect_ack(NfsRequest::Create {
            path: path.to_string(),
            mode,
        })
        .await
    }

    pub async fn remove(&self, path: &str) -> Result<(), ClientError> {
        let handle = self.lookup(path).await?;
        self.expect_ack(NfsRequest::Remove { handle }).await?;
        self.handles.forget(path);
        Ok(())
    }

    async fn send_write(
        &self,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
        stable: StableHow,
    ) -> Result<(u32, WriteVerifier), ClientError> {
        let req = NfsRequest::Write {
            handle,
            offset,
            count: data.len() as u32,
            data: data.to_vec(),
            stable,
        };
        match self.caller.call(&req).await? {
            NfsResponse::Written {
                count, verifier, ..
            } => Ok((count, verifier)),
            other => Err(unexpected(Procedure::Write, other)),
        }
    }

    async fn expect_ack(&self, req: NfsRequest) -> Result<(), ClientError> {
        let procedure = req.procedure();
        match self.caller.call(&req).await? {
            NfsResponse::Ack => Ok(()),
            other => Err(unexpected(procedure, other)),
        }
    }
}

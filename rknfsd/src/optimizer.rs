//! Batched write optimizer.
//!
//! Unstable WRITEs are parked here instead of hitting the disk. They leave the
//! queue in exactly one of two ways: a COMMIT for their handle flushes all of
//! that handle's writes, or the background flusher pops the globally oldest
//! writes every tick. Both paths, and queue insertion, take the same mutex.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use common::FileHandle;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::localfs;
use crate::resolver::{PathResolver, ResolveError};

/// Writes popped per scheduler tick.
pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub request_id: u64,
    pub handle: FileHandle,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Success,
    /// The handle had nothing queued.
    NoneToCommit,
    Failure,
}

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("resolve handle: {0}")]
    Resolve(#[from] ResolveError),
    #[error("write: {0}")]
    Io(#[from] io::Error),
}

#[derive(Default)]
struct WriteQueue {
    last_request_id: u64,
    pending: BTreeMap<u64, PendingWrite>,
    by_handle: HashMap<FileHandle, Vec<u64>>,
}

impl WriteQueue {
    fn unindex(&mut self, handle: &FileHandle, request_id: u64) {
        if let Some(ids) = self.by_handle.get_mut(handle) {
            ids.retain(|id| *id != request_id);
            if ids.is_empty() {
                self.by_handle.remove(handle);
            }
        }
    }

    fn remove(&mut self, request_id: u64) -> Option<PendingWrite> {
        let write = self.pending.remove(&request_id)?;
        self.unindex(&write.handle, request_id);
        Some(write)
    }

    fn pop_oldest(&mut self) -> Option<PendingWrite> {
        let (_, write) = self.pending.pop_first()?;
        self.unindex(&write.handle, write.request_id);
        Some(write)
    }
}

pub struct BatchWriteOptimizer {
    resolver: Arc<PathResolver>,
    batch_size: usize,
    queue: Mutex<WriteQueue>,
}

impl BatchWriteOptimizer {
    pub fn new(resolver: Arc<PathResolver>, batch_size: usize) -> Self {
        Self {
            resolver,
            batch_size: batch_size.max(1),
            queue: Mutex::new(WriteQueue::default()),
        }
    }

    /// Queues an unstable write and returns its request id. Ids start at 1.
    pub async fn create_request(&self, handle: FileHandle, offset: u64, data: Vec<u8>) -> u64 {
        let mut queue = self.queue.lock().await;
        queue.last_request_id += 1;
        let request_id = queue.last_request_id;
        queue
            .by_handle
            .entry(handle.clone())
            .or_default()
            .push(request_id);
        debug!(
            "queued request {request_id}: handle={handle} offset={offset} len={}",
            data.len()
        );
        queue.pending.insert(
            request_id,
            PendingWrite {
                request_id,
                handle,
                offset,
                data,
            },
        );
        request_id
    }

    /// Flushes every queued write of `handle`, oldest first.
    ///
    /// On the first failed write the remaining writes of the handle stay
    /// queued and `Failure` is returned.
    pub async fn commit_request_for(&self, handle: &FileHandle) -> CommitStatus {
        let mut queue = self.queue.lock().await;
        let Some(ids) = queue.by_handle.get(handle).cloned() else {
            return CommitStatus::NoneToCommit;
        };

        for request_id in ids {
            let Some(write) = queue.pending.get(&request_id) else {
                continue;
            };
            if let Err(e) = self.flush(write).await {
                warn!("commit of request {request_id} for handle {handle} failed: {e}");
                return CommitStatus::Failure;
            }
            queue.remove(request_id);
        }
        debug!("committed all pending writes of handle {handle}");
        CommitStatus::Success
    }

    /// Flushes up to `batch_size` of the oldest queued writes, whatever their
    /// handle, and returns their request ids in flush order.
    ///
    /// A write is dropped from the queue even if flushing it failed.
    pub async fn scheduled_commit(&self) -> Vec<u64> {
        let mut queue = self.queue.lock().await;
        let mut flushed = Vec::new();
        for _ in 0..self.batch_size {
            let Some(write) = queue.pop_oldest() else {
                break;
            };
            if let Err(e) = self.flush(&write).await {
                warn!(
                    "scheduled flush of request {} for handle {} failed, dropping it: {e}",
                    write.request_id, write.handle
                );
            }
            flushed.push(write.request_id);
        }
        flushed
    }

    /// Flushes everything still queued, in request order.
    pub async fn drain(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let mut count = 0;
        while let Some(write) = queue.pop_oldest() {
            if let Err(e) = self.flush(&write).await {
                warn!("drain of request {} failed: {e}", write.request_id);
            }
            count += 1;
        }
        count
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.lock().await.pending.len()
    }

    pub async fn pending_for(&self, handle: &FileHandle) -> Vec<u64> {
        self.queue
            .lock()
            .await
            .by_handle
            .get(handle)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs [`scheduled_commit`](Self::scheduled_commit) every `interval`
    /// until `cancel` fires, then drains the queue.
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "batch flusher started: interval={interval:?} batch_size={}",
                self.batch_size
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        self.scheduled_commit().await;
                    }
                }
            }
            let drained = self.drain().await;
            info!("batch flusher stopped, drained {drained} pending writes");
        })
    }

    async fn flush(&self, write: &PendingWrite) -> Result<(), FlushError> {
        let path = self.resolver.resolve_async(&write.handle).await?;
        localfs::write_synced(&path, write.offset, &write.data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::MetadataExt;

    fn setup(files: &[&str]) -> (tempfile::TempDir, Arc<BatchWriteOptimizer>, Vec<FileHandle>) {
        let dir = tempfile::tempdir().unwrap();
        let mut handles = Vec::new();
        for f in files {
            let p = dir.path().join(f);
            fs::write(&p, b"").unwrap();
            handles.push(FileHandle::from_ino(fs::metadata(&p).unwrap().ino()));
        }
        let resolver = Arc::new(PathResolver::new(dir.path()));
        let opt = Arc::new(BatchWriteOptimizer::new(resolver, 1));
        (dir, opt, handles)
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let (_dir, opt, fh) = setup(&["a", "b"]);
        assert_eq!(opt.create_request(fh[0].clone(), 0, b"1".to_vec()).await, 1);
        assert_eq!(opt.create_request(fh[1].clone(), 0, b"2".to_vec()).await, 2);
        assert_eq!(opt.create_request(fh[0].clone(), 1, b"3".to_vec()).await, 3);
        assert_eq!(opt.pending_for(&fh[0]).await, vec![1, 3]);
        assert_eq!(opt.pending_len().await, 3);
    }

    #[tokio::test]
    async fn test_scheduled_commit_is_fifo_across_handles() {
        let (dir, opt, fh) = setup(&["a", "b"]);
        opt.create_request(fh[0].clone(), 0, b"w1".to_vec()).await;
        opt.create_request(fh[1].clone(), 0, b"w2".to_vec()).await;
        opt.create_request(fh[0].clone(), 0, b"w3".to_vec()).await;

        assert_eq!(opt.scheduled_commit().await, vec![1]);
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"w1");
        assert!(fs::read(dir.path().join("b")).unwrap().is_empty());

        assert_eq!(opt.scheduled_commit().await, vec![2]);
        assert_eq!(fs::read(dir.path().join("b")).unwrap(), b"w2");

        assert_eq!(opt.scheduled_commit().await, vec![3]);
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"w3");

        assert!(opt.scheduled_commit().await.is_empty());
        assert!(opt.pending_for(&fh[0]).await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_flushes_only_its_handle() {
        let (dir, opt, fh) = setup(&["a", "b"]);
        opt.create_request(fh[0].clone(), 0, b"hello".to_vec()).await;
        opt.create_request(fh[1].clone(), 0, b"other".to_vec()).await;
        opt.create_request(fh[0].clone(), 5, b" world".to_vec()).await;

        assert_eq!(opt.commit_request_for(&fh[0]).await, CommitStatus::Success);
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"hello world");
        assert!(fs::read(dir.path().join("b")).unwrap().is_empty());
        assert_eq!(opt.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_commit_without_pending_is_noop() {
        let (dir, opt, fh) = setup(&["a"]);
        assert_eq!(
            opt.commit_request_for(&fh[0]).await,
            CommitStatus::NoneToCommit
        );

        opt.create_request(fh[0].clone(), 0, b"x".to_vec()).await;
        assert_eq!(opt.commit_request_for(&fh[0]).await, CommitStatus::Success);
        for _ in 0..3 {
            assert_eq!(
                opt.commit_request_for(&fh[0]).await,
                CommitStatus::NoneToCommit
            );
        }
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_scheduler_and_commit_never_flush_twice() {
        let (_dir, opt, fh) = setup(&["a"]);
        opt.create_request(fh[0].clone(), 0, b"1".to_vec()).await;
        opt.create_request(fh[0].clone(), 1, b"2".to_vec()).await;

        assert_eq!(opt.scheduled_commit().await, vec![1]);
        assert_eq!(opt.pending_for(&fh[0]).await, vec![2]);
        assert_eq!(opt.commit_request_for(&fh[0]).await, CommitStatus::Success);
        assert!(opt.scheduled_commit().await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_writes_queued() {
        let (dir, opt, fh) = setup(&["a"]);
        opt.create_request(fh[0].clone(), 0, b"lost".to_vec()).await;
        fs::remove_file(dir.path().join("a")).unwrap();

        assert_eq!(opt.commit_request_for(&fh[0]).await, CommitStatus::Failure);
        assert_eq!(opt.pending_len().await, 1);

        // the scheduler drops it even though the write cannot land
        assert_eq!(opt.scheduled_commit().await, vec![1]);
        assert_eq!(opt.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_flusher_drains_on_cancel() {
        let (dir, opt, fh) = setup(&["a"]);
        let cancel = CancellationToken::new();
        let task = opt
            .clone()
            .spawn_flusher(Duration::from_secs(3600), cancel.clone());
        // first tick fires immediately; give it a chance before queueing
        tokio::time::sleep(Duration::from_millis(20)).await;
        opt.create_request(fh[0].clone(), 0, b"abc".to_vec()).await;
        opt.create_request(fh[0].clone(), 3, b"def".to_vec()).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(opt.pending_len().await, 0);
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_flusher_empties_queue_over_time() {
        let (dir, opt, fh) = setup(&["a"]);
        let cancel = CancellationToken::new();
        let task = opt
            .clone()
            .spawn_flusher(Duration::from_millis(5), cancel.clone());
        for i in 0..4u64 {
            opt.create_request(fh[0].clone(), i, vec![b'a' + i as u8]).await;
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while opt.pending_len().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"abcd");
        cancel.cancel();
        task.await.unwrap();
    }
}

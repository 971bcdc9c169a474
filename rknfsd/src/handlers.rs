use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use common::{
    FileHandle, MAX_IO_SIZE, NfsRequest, NfsResponse, NfsStatus, StableHow, WriteVerifier,
};
use log::{debug, info};
use tokio::fs;

use crate::localfs;
use crate::optimizer::{BatchWriteOptimizer, CommitStatus};
use crate::resolver::PathResolver;

fn io_status(err: io::Error) -> NfsStatus {
    match err.kind() {
        io::ErrorKind::NotFound => NfsStatus::NotFound,
        io::ErrorKind::AlreadyExists => NfsStatus::Exists,
        _ => NfsStatus::Io(err.to_string()),
    }
}

/// Server side of every remote procedure. One instance per server process;
/// its verifier identifies that incarnation.
pub struct NfsService {
    resolver: Arc<PathResolver>,
    optimizer: Arc<BatchWriteOptimizer>,
    verifier: WriteVerifier,
}

impl NfsService {
    pub fn new(
        resolver: Arc<PathResolver>,
        optimizer: Arc<BatchWriteOptimizer>,
        verifier: WriteVerifier,
    ) -> Self {
        info!(
            "nfs service ready: root={} verifier={verifier}",
            resolver.root().display()
        );
        Self {
            resolver,
            optimizer,
            verifier,
        }
    }

    pub fn verifier(&self) -> WriteVerifier {
        self.verifier
    }

    pub fn optimizer(&self) -> &Arc<BatchWriteOptimizer> {
        &self.optimizer
    }

    pub fn resolver(&self) -> &Arc<PathResolver> {
        &self.resolver
    }

    /// Runs one request. Handler failures become `NfsResponse::Failure`.
    pub async fn dispatch(&self, req: NfsRequest) -> NfsResponse {
        let procedure = req.procedure();
        let result = match req {
            NfsRequest::Lookup { path } => self.lookup(&path).await,
            NfsRequest::GetAttr { handle } => self.getattr(&handle).await,
            NfsRequest::SetAttr { handle, size } => self.setattr(&handle, size).await,
            NfsRequest::Read {
                handle,
                offset,
                count,
            } => self.read(&handle, offset, count).await,
            NfsRequest::Write {
                handle,
                offset,
                count,
                data,
                stable,
            } => self.write(handle, offset, count, data, stable).await,
            NfsRequest::Commit { handle, .. } => self.commit(&handle).await,
            NfsRequest::Mkdir { path, mode } => self.mkdir(&path, mode).await,
            NfsRequest::Rmdir { handle } => self.rmdir(&handle).await,
            NfsRequest::Create { path, mode } => self.create(&path, mode).await,
            NfsRequest::Remove { handle } => self.remove(&handle).await,
        };
        match result {
            Ok(resp) => resp,
            Err(status) => {
                debug!("{procedure} failed: {status}");
                NfsResponse::Failure(status)
            }
        }
    }

    async fn resolve(&self, handle: &FileHandle) -> Result<PathBuf, NfsStatus> {
        Ok(self.resolver.resolve_async(handle).await?)
    }

    async fn lookup(&self, token: &str) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolver.local_path(token)?;
        let resolver = self.resolver.clone();
        let handle = tokio::task::spawn_blocking(move || resolver.record(&path))
            .await
            .map_err(|e| NfsStatus::Io(e.to_string()))?
            .map_err(io_status)?;
        debug!("LOOKUP {token} -> {handle}");
        Ok(NfsResponse::Handle(handle))
    }

    async fn getattr(&self, handle: &FileHandle) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolve(handle).await?;
        let meta = fs::symlink_metadata(&path).await.map_err(io_status)?;
        Ok(NfsResponse::Attr(localfs::attr_from_metadata(&meta)))
    }

    async fn setattr(&self, handle: &FileHandle, size: u64) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolve(handle).await?;
        localfs::truncate(&path, size).await.map_err(io_status)?;
        Ok(NfsResponse::Ack)
    }

    async fn read(
        &self,
        handle: &FileHandle,
        offset: u64,
        count: u32,
    ) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolve(handle).await?;
        // short reads are legal; a bigger reply would not fit in one frame
        let count = count.min(MAX_IO_SIZE);
        let data = localfs::read_at(&path, offset, count)
            .await
            .map_err(io_status)?;
        let count = data.len() as u32;
        Ok(NfsResponse::Data { data, count })
    }

    async fn write(
        &self,
        handle: FileHandle,
        offset: u64,
        count: u32,
        mut data: Vec<u8>,
        stable: StableHow,
    ) -> Result<NfsResponse, NfsStatus> {
        if count as usize > data.len() {
            return Err(NfsStatus::Invalid(format!(
                "count {count} exceeds payload of {} bytes",
                data.len()
            )));
        }
        data.truncate(count as usize);

        let path = self.resolve(&handle).await?;
        let meta = fs::symlink_metadata(&path).await.map_err(io_status)?;
        if !meta.is_file() {
            return Err(NfsStatus::Invalid(format!("{handle} is not a regular file")));
        }

        match stable {
            StableHow::Unstable => {
                self.optimizer.create_request(handle, offset, data).await;
                Ok(NfsResponse::Written {
                    count,
                    verifier: self.verifier,
                    committed: StableHow::Unstable,
                })
            }
            StableHow::DataSync => {
                let written = localfs::write_synced(&path, offset, &data)
                    .await
                    .map_err(io_status)?;
                Ok(NfsResponse::Written {
                    count: written as u32,
                    verifier: self.verifier,
                    committed: StableHow::DataSync,
                })
            }
        }
    }

    async fn commit(&self, handle: &FileHandle) -> Result<NfsResponse, NfsStatus> {
        match self.optimizer.commit_request_for(handle).await {
            CommitStatus::Success | CommitStatus::NoneToCommit => Ok(NfsResponse::Committed {
                verifier: self.verifier,
            }),
            CommitStatus::Failure => Err(NfsStatus::Io(format!(
                "could not flush pending writes of {handle}"
            ))),
        }
    }

    async fn mkdir(&self, token: &str, mode: u32) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolver.local_path(token)?;
        if fs::symlink_metadata(&path).await.is_ok() {
            return Err(NfsStatus::Exists);
        }
        localfs::create_dir(&path, mode).await.map_err(io_status)?;
        self.remember(path).await;
        Ok(NfsResponse::Ack)
    }

    async fn rmdir(&self, handle: &FileHandle) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolve(handle).await?;
        fs::remove_dir(&path).await.map_err(io_status)?;
        self.resolver.forget(&path);
        Ok(NfsResponse::Ack)
    }

    async fn create(&self, token: &str, mode: u32) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolver.local_path(token)?;
        localfs::create_file(&path, mode)
            .await
            .map_err(io_status)?;
        self.remember(path).await;
        Ok(NfsResponse::Ack)
    }

    async fn remove(&self, handle: &FileHandle) -> Result<NfsResponse, NfsStatus> {
        let path = self.resolve(handle).await?;
        fs::remove_file(&path).await.map_err(io_status)?;
        self.resolver.forget(&path);
        Ok(NfsResponse::Ack)
    }

    async fn remember(&self, path: PathBuf) {
        let resolver = self.resolver.clone();
        let shown = path.display().to_string();
        // the object exists at this point; a failed stat only costs a walk later
        match tokio::task::spawn_blocking(move || resolver.record(&path)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("not indexing {shown}: {e}"),
            Err(e) => debug!("indexing task for {shown} failed: {e}"),
        }
    }
}

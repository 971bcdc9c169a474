//! Handle to path resolution.
//!
//! A handle is the inode number of an object under the server root. The
//! resolver keeps an inode -> path index that is filled by LOOKUP/CREATE/MKDIR
//! and by every walk, and dropped on REMOVE/RMDIR. An index hit is re-checked
//! with `lstat` before it is trusted; a miss falls back to a depth-first walk
//! of the root, so the cost of a cold resolve is still proportional to the
//! size of the tree.

use std::collections::HashMap;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use common::{FileHandle, NfsStatus};
use log::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("malformed file handle {0:?}")]
    BadHandle(String),
    #[error("no object with inode {0} under the server root")]
    NotFound(u64),
    #[error("path {0:?} escapes the server root")]
    Escapes(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ResolveError> for NfsStatus {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => NfsStatus::NotFound,
            ResolveError::BadHandle(_) | ResolveError::Escapes(_) => {
                NfsStatus::Invalid(err.to_string())
            }
            ResolveError::Io(e) if e.kind() == io::ErrorKind::NotFound => NfsStatus::NotFound,
            ResolveError::Io(e) => NfsStatus::Io(e.to_string()),
        }
    }
}

pub struct PathResolver {
    root: PathBuf,
    index: RwLock<HashMap<u64, PathBuf>>,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a client path token such as `/a/b.txt` onto the server root.
    /// Tokens that climb out with `..` are refused.
    pub fn local_path(&self, token: &str) -> Result<PathBuf, ResolveError> {
        let mut path = self.root.clone();
        for comp in Path::new(token).components() {
            match comp {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(name) => path.push(name),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ResolveError::Escapes(token.to_string()));
                }
            }
        }
        Ok(path)
    }

    pub fn resolve(&self, handle: &FileHandle) -> Result<PathBuf, ResolveError> {
        let ino = handle
            .ino()
            .map_err(|_| ResolveError::BadHandle(handle.to_string()))?;
        if let Some(path) = self.indexed(ino) {
            return Ok(path);
        }
        self.walk_for(ino)
    }

    /// Blocking-pool wrapper around [`resolve`](Self::resolve) for async callers.
    pub async fn resolve_async(self: &Arc<Self>, handle: &FileHandle) -> Result<PathBuf, ResolveError> {
        let resolver = Arc::clone(self);
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&handle))
            .await
            .map_err(|e| ResolveError::Io(io::Error::other(e)))?
    }

    /// Stats `path` and remembers it under its inode. Returns the handle.
    pub fn record(&self, path: &Path) -> io::Result<FileHandle> {
        let meta = std::fs::symlink_metadata(path)?;
        self.insert(meta.ino(), path);
        Ok(FileHandle::from_ino(meta.ino()))
    }

    /// Drops `path` and everything below it from the index.
    pub fn forget(&self, path: &Path) {
        if let Ok(mut index) = self.index.write() {
            index.retain(|_, p| !p.starts_with(path));
        }
    }

    pub fn indexed_len(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }

    fn indexed(&self, ino: u64) -> Option<PathBuf> {
        let path = self.index.read().ok()?.get(&ino).cloned()?;
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.ino() == ino => Some(path),
            _ => {
                debug!("stale index entry for inode {ino}: {}", path.display());
                if let Ok(mut index) = self.index.write() {
                    index.remove(&ino);
                }
                None
            }
        }
    }

    fn walk_for(&self, ino: u64) -> Result<PathBuf, ResolveError> {
        let mut seen = Vec::new();
        let mut found = None;
        for entry in WalkDir::new(&self.root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!("error while walking {}: {err}", self.root.display());
                    continue;
                }
            };
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    warn!("stat {} failed: {err}", entry.path().display());
                    continue;
                }
            };
            if meta.ino() == ino {
                found = Some(entry.into_path());
                break;
            }
            seen.push((meta.ino(), entry.into_path()));
        }

        if let Ok(mut index) = self.index.write() {
            for (i, p) in seen {
                index.insert(i, p);
            }
            if let Some(path) = &found {
                index.insert(ino, path.clone());
            }
        }
        found.ok_or(ResolveError::NotFound(ino))
    }

    fn insert(&self, ino: u64, path: &Path) {
        if let Ok(mut index) = self.index.write() {
            index.insert(ino, path.to_path_buf());
        }
    }
}

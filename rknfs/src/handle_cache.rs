use std::collections::HashMap;
use std::sync::Mutex;

use common::{FileHandle, NfsRequest, NfsResponse, Procedure};
use log::debug;

use crate::error::ClientError;
use crate::retry::RetryingCaller;
use crate::transport::Transport;

/// Path token -> server handle, filled by LOOKUP.
///
/// Entries are never checked against the server again; a handle whose
/// inode was reused elsewhere keeps pointing at the new object.
#[derive(Default)]
pub struct FileHandleCache {
    entries: Mutex<HashMap<String, FileHandle>>,
}

impl FileHandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<FileHandle> {
        self.entries.lock().ok()?.get(path).cloned()
    }

    pub fn insert(&self, path: &str, handle: FileHandle) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.to_string(), handle);
        }
    }

    /// Drops `path` after this client removed the object itself.
    pub fn forget(&self, path: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(path);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached handle or asks the server with LOOKUP.
    /// A missing object comes back as [`ClientError::NotFound`].
    pub async fn resolve<T: Transport>(
        &self,
        caller: &RetryingCaller<T>,
        path: &str,
    ) -> Result<FileHandle, ClientError> {
        if let Some(handle) = self.get(path) {
            return Ok(handle);
        }

        let req = NfsRequest::Lookup {
            path: path.to_string(),
        };
        match caller.call(&req).await? {
            NfsResponse::Handle(handle) => {
                debug!("cached handle {handle} for {path}");
                self.insert(path, handle.clone());
                Ok(handle)
            }
            NfsResponse::Failure(status) => Err(ClientError::from_status(Procedure::Lookup, status)),
            other => Err(ClientError::UnexpectedReply {
                procedure: Procedure::Lookup,
                reply: format!("{other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use common::NfsStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Lookups {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for Lookups {
        async fn call(&self, req: &NfsRequest) -> Result<NfsResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match req {
                NfsRequest::Lookup { path } if path == "/missing" => {
                    Ok(NfsResponse::Failure(NfsStatus::NotFound))
                }
                NfsRequest::Lookup { .. } => Ok(NfsResponse::Handle(FileHandle::from_ino(11))),
                _ => Ok(NfsResponse::Ack),
            }
        }
    }

    #[tokio::test]
    async fn test_lookup_once_then_cached() {
        let caller = RetryingCaller::new(
            Lookups {
                calls: AtomicU32::new(0),
            },
            RetryPolicy::default(),
        );
        let cache = FileHandleCache::new();

        let first = cache.resolve(&caller, "/a/b.txt").await.unwrap();
        let second = cache.resolve(&caller, "/a/b.txt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(caller.transport().calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        cache.forget("/a/b.txt");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let caller = RetryingCaller::new(
            Lookups {
                calls: AtomicU32::new(0),
            },
            RetryPolicy::default(),
        );
        let cache = FileHandleCache::new();

        for _ in 0..2 {
            assert!(matches!(
                cache.resolve(&caller, "/missing").await,
                Err(ClientError::NotFound)
            ));
        }
        assert_eq!(caller.transport().calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}

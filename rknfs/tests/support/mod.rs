#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{NfsRequest, NfsResponse, StableHow, WriteVerifier};
use rknfs::{NfsSession, RetryPolicy, Transport, TransportError};
use rknfsd::build_service;
use rknfsd::config::Config;
use rknfsd::handlers::NfsService;
use tempfile::TempDir;

/// Runs requests straight through a server `NfsService`, with hooks to
/// restart the server, inject wire failures and inspect what was sent.
pub struct LocalTransport {
    root: PathBuf,
    service: RwLock<Arc<NfsService>>,
    incarnation: AtomicU64,
    fail_next: AtomicU32,
    write_delay_ms: AtomicU64,
    sent: Mutex<Vec<NfsRequest>>,
}

impl LocalTransport {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            service: RwLock::new(Self::boot(root, 1)),
            incarnation: AtomicU64::new(1),
            fail_next: AtomicU32::new(0),
            write_delay_ms: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn boot(root: &Path, verifier: u64) -> Arc<NfsService> {
        let cfg = Config {
            root: root.to_path_buf(),
            ..Default::default()
        };
        build_service(&cfg, WriteVerifier(verifier))
    }

    /// Simulates a server crash: queued unstable writes are lost and the
    /// new incarnation answers with a different verifier.
    pub fn restart(&self) {
        let next = self.incarnation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.service.write().unwrap() = Self::boot(&self.root, next);
    }

    pub fn service(&self) -> Arc<NfsService> {
        self.service.read().unwrap().clone()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Holds every WRITE for `delay` before the server sees it.
    pub fn delay_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<NfsRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Offsets of the stable WRITEs seen so far, in send order.
    pub fn stable_write_offsets(&self) -> Vec<u64> {
        self.sent()
            .into_iter()
            .filter_map(|req| match req {
                NfsRequest::Write {
                    offset,
                    stable: StableHow::DataSync,
                    ..
                } => Some(offset),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, req: &NfsRequest) -> Result<NfsResponse, TransportError> {
        self.sent.lock().unwrap().push(req.clone());
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Stream("injected failure".to_string()));
        }
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 && matches!(req, NfsRequest::Write { .. }) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let service = self.service();
        Ok(service.dispatch(req.clone()).await)
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        rpc_timeout: Duration::from_secs(2),
        initial_backoff: Duration::from_millis(1),
        max_attempts: Some(5),
        deadline: None,
    }
}

pub fn local_session() -> (TempDir, Arc<LocalTransport>, NfsSession<Arc<LocalTransport>>) {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(LocalTransport::new(dir.path()));
    let session = NfsSession::new(transport.clone(), fast_policy());
    (dir, transport, session)
}

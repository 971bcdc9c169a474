//! Client-side copy of every unstable write that has not been confirmed by
//! a COMMIT yet.
//!
//! Records are kept per path in the order they were issued, together with
//! the verifier of the most recent unstable WRITE reply. COMMIT compares that
//! verifier with its own; on a mismatch the records are replayed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use common::WriteVerifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub offset: u64,
    pub data: Vec<u8>,
    seq: u64,
}

#[derive(Default)]
struct PathRecords {
    records: Vec<WriteRecord>,
    verifier: Option<WriteVerifier>,
}

/// Everything buffered for one path, taken out at commit time.
#[derive(Debug, Default)]
pub struct Buffered {
    pub records: Vec<WriteRecord>,
    pub verifier: Option<WriteVerifier>,
}

#[derive(Default)]
pub struct WriteBuffer {
    next_seq: AtomicU64,
    paths: Mutex<HashMap<String, PathRecords>>,
}

/// Ticket for a record, used to withdraw it when its WRITE failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId(u64);

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: &str, offset: u64, data: &[u8]) -> RecordId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut paths) = self.paths.lock() {
            paths
                .entry(path.to_string())
                .or_default()
                .records
                .push(WriteRecord {
                    offset,
                    data: data.to_vec(),
                    seq,
                });
        }
        RecordId(seq)
    }

    pub fn withdraw(&self, path: &str, id: RecordId) {
        if let Ok(mut paths) = self.paths.lock()
            && let Some(entry) = paths.get_mut(path)
        {
            entry.records.retain(|r| r.seq != id.0);
            if entry.records.is_empty() {
                paths.remove(path);
            }
        }
    }

    pub fn set_verifier(&self, path: &str, verifier: WriteVerifier) {
        if let Ok(mut paths) = self.paths.lock()
            && let Some(entry) = paths.get_mut(path)
        {
            entry.verifier = Some(verifier);
        }
    }

    pub fn pending(&self, path: &str) -> usize {
        self.paths
            .lock()
            .ok()
            .and_then(|p| p.get(path).map(|e| e.records.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, path: &str) -> bool {
        self.pending(path) == 0
    }

    /// Removes and returns everything buffered for `path`.
    pub fn take(&self, path: &str) -> Buffered {
        let entry = self
            .paths
            .lock()
            .ok()
            .and_then(|mut p| p.remove(path))
            .unwrap_or_default();
        Buffered {
            records: entry.records,
            verifier: entry.verifier,
        }
    }
}

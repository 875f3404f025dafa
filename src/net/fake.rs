//! In-memory storage-server double. Not a production transport — it
//! exists so the Processor can be exercised end-to-end (the six
//! concrete scenarios of §8) without real sockets, the way the teacher
//! drives its index/store logic against an in-memory `sqlx` pool in
//! tests rather than a live network peer.

use super::{ServerLink, WriteBatchEntry};
use crate::{bucket::Bucket, crypto::PathCipher, error::Result};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;

pub struct FakeServerLink {
    height: u32,
    bucket_capacity: usize,
    cipher: Arc<dyn PathCipher>,
    paths: Mutex<HashMap<u64, Vec<u8>>>,
    write_calls: AtomicU64,
}

impl FakeServerLink {
    pub fn new(height: u32, bucket_capacity: usize, cipher: Arc<dyn PathCipher>) -> Self {
        Self {
            height,
            bucket_capacity,
            cipher,
            paths: Mutex::new(HashMap::new()),
            write_calls: AtomicU64::new(0),
        }
    }

    /// Number of completed `write_paths` batches. Test instrumentation
    /// only — production `ServerLink`s have no reason to expose this.
    pub fn write_call_count(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn fresh_encrypted_path(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for _ in 0..=self.height {
            let bucket = Bucket::empty(self.bucket_capacity);
            out.extend(self.cipher.encrypt_bucket(&bucket)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl ServerLink for FakeServerLink {
    async fn read_path(&self, relative_leaf: u64) -> Result<Vec<u8>> {
        let mut paths = self.paths.lock().await;
        if let Some(bytes) = paths.get(&relative_leaf) {
            return Ok(bytes.clone());
        }
        let fresh = self.fresh_encrypted_path()?;
        paths.insert(relative_leaf, fresh.clone());
        Ok(fresh)
    }

    async fn write_paths(&self, entries: Vec<WriteBatchEntry>) -> Result<()> {
        let mut paths = self.paths.lock().await;
        for entry in entries {
            paths.insert(entry.relative_leaf, entry.encrypted_path);
        }
        drop(paths);
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

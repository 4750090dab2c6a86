//! Object-store backend seam used by higher layers.
//!
//! [`CosClient`] is the production implementation; [`MockObjectStore`] keeps
//! objects in memory and counts operations for tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::CosClient;
use crate::error::{StorageError, StorageResult};
use crate::request::{CheckObjectExistRequest, DeleteObjectRequest, GetObjectRequest};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Blob storage addressed by key.
pub trait ObjectStoreBackend: Send + Sync {
    /// Upload a local file, multipart when large.
    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, StorageResult<()>>;
    /// Upload in-memory bytes.
    fn put_bytes<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, StorageResult<()>>;
    /// Download a whole object.
    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Bytes>>;
    /// Delete an object; missing keys are fine.
    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>>;
    /// Check whether a key exists.
    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<bool>>;
}

impl ObjectStoreBackend for CosClient {
    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.put_file_object(key, path).await?;
            Ok(())
        })
    }

    fn put_bytes<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let length = data.len() as u64;
            self.put_stream_object(key, &data[..], length).await?;
            Ok(())
        })
    }

    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Bytes>> {
        Box::pin(async move {
            let object = CosClient::get_object(self, GetObjectRequest::new(key)).await?;
            Ok(object.content)
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(CosClient::delete_object(self, DeleteObjectRequest::new(key)))
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        Box::pin(self.check_object_exist(CheckObjectExistRequest::new(key)))
    }
}

/// Statistics for the mock object store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockObjectStoreStats {
    /// Number of put operations (file or bytes).
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of delete operations.
    pub deletes: u64,
    /// Number of exists checks.
    pub exists_checks: u64,
    /// Total bytes currently stored.
    pub total_bytes_stored: u64,
}

/// In-memory object store for testing.
#[derive(Default)]
pub struct MockObjectStore {
    store: Mutex<HashMap<String, Bytes>>,
    failing_keys: Mutex<HashSet<String>>,
    stats: Mutex<MockObjectStoreStats>,
}

impl MockObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get statistics about store operations.
    pub fn stats(&self) -> MockObjectStoreStats {
        self.stats.lock().unwrap().clone()
    }

    /// Number of stored objects.
    pub fn stored_count(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Stored bytes for `key`.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.store.lock().unwrap().get(key).cloned()
    }

    /// Store an object directly without counting a put.
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(data));
    }

    /// Make every put of `key` fail with a 503.
    pub fn fail_puts_for(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    fn store_bytes(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(StorageError::Http {
                status: 503,
                code: "ServiceUnavailable".to_string(),
                message: format!("injected put failure for {}", key),
                request_id: None,
            });
        }
        let bytes = data.len() as u64;
        let previous = self.store.lock().unwrap().insert(key.to_string(), data);

        let mut stats = self.stats.lock().unwrap();
        stats.puts += 1;
        stats.total_bytes_stored = stats
            .total_bytes_stored
            .saturating_sub(previous.map(|p| p.len() as u64).unwrap_or(0))
            .saturating_add(bytes);
        debug!(key, bytes, "mock put");
        Ok(())
    }
}

impl ObjectStoreBackend for MockObjectStore {
    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let data = match tokio::fs::read(path).await {
                Ok(d) => d,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::FileNotFound {
                        path: path.display().to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            self.store_bytes(key, Bytes::from(data))
        })
    }

    fn put_bytes<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, StorageResult<()>> {
        let result = self.store_bytes(key, data);
        Box::pin(async move { result })
    }

    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Bytes>> {
        let result = self.store.lock().unwrap().get(key).cloned();
        self.stats.lock().unwrap().gets += 1;

        Box::pin(async move {
            debug!(key, found = result.is_some(), "mock get");
            result.ok_or_else(|| StorageError::Http {
                status: 404,
                code: "NoSuchKey".to_string(),
                message: format!("{} not found in mock store", key),
                request_id: None,
            })
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        let removed = self.store.lock().unwrap().remove(key);
        let bytes_removed = removed.map(|d| d.len() as u64).unwrap_or(0);

        let mut stats = self.stats.lock().unwrap();
        stats.deletes += 1;
        stats.total_bytes_stored = stats.total_bytes_stored.saturating_sub(bytes_removed);
        drop(stats);

        Box::pin(async move {
            debug!(key, "mock delete");
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        let exists = self.store.lock().unwrap().contains_key(key);
        self.stats.lock().unwrap().exists_checks += 1;

        Box::pin(async move {
            debug!(key, exists, "mock exists");
            Ok(exists)
        })
    }
}

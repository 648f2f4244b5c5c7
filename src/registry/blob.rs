//! Blob store seam used by verification and download resolution.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PackError, Result};
use crate::pack::hash::content_digest;
use crate::registry::model::UploadTicket;

/// What the store reports about stored content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub size: u64,
    /// The store's own digest of the content (hex).
    pub integrity_hash: String,
}

pub trait BlobStore: Send + Sync {
    /// `Ok(None)` when no blob exists under `key`.
    fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>>;

    fn get_url(&self, key: &str) -> Result<String>;

    fn generate_upload_url(&self) -> Result<UploadTicket>;
}

/// Retry behavior for blob lookups.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    pub initial_backoff: Duration,
    /// Total budget across all attempts.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            initial_backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub const fn no_retry() -> Self {
        Self {
            retries: 0,
            initial_backoff: Duration::ZERO,
            timeout: Duration::from_secs(10),
        }
    }

    /// Exponential delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(1 << attempt.min(16))
    }
}

/// Run `operation`, retrying transient failures until attempts or the time
/// budget run out.
pub fn with_retry<T, F>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let started = Instant::now();
    let attempts = policy.retries.saturating_add(1);

    for attempt in 0..attempts {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                if started.elapsed() + delay > policy.timeout {
                    return Err(PackError::Timeout(format!(
                        "{what} exceeded {} ms: {err}",
                        policy.timeout.as_millis()
                    )));
                }
                warn!(attempt = attempt + 1, error = %err, "{what} failed, retrying");
                std::thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }

    Err(PackError::Timeout(format!("{what}: no attempts made")))
}

/// Storage keys are opaque single path components: 1-128 of `[A-Za-z0-9_-]`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn validate_key(key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(PackError::PathTraversal(key.to_string()))
    }
}

/// Blobs stored as files under `<root>/blobs/<key>`.
pub struct FsBlobStore {
    dir: PathBuf,
    base_url: Option<String>,
}

impl FsBlobStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join("blobs");
        fs::create_dir_all(&dir).map_err(|err| {
            PackError::Storage(format!("create blob store {}: {err}", dir.display()))
        })?;
        Ok(Self {
            dir,
            base_url: None,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    /// Store `bytes` under a fresh key.
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        self.put_at(&key, bytes)?;
        Ok(key)
    }

    /// Store `bytes` under a key previously handed out by `generate_upload_url`.
    pub fn put_at(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(key)?;
        crate::utils::fs::write_atomic(&path, bytes)
            .map_err(|err| PackError::Storage(format!("write blob {key}: {err}")))?;
        debug!(key, bytes = bytes.len(), "blob stored");
        Ok(())
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    fn url_for(&self, prefix: &str, key: &str) -> Result<String> {
        match &self.base_url {
            Some(base) => Ok(format!("{base}/{prefix}{key}")),
            None => Ok(format!("file://{}", self.blob_path(key)?.display())),
        }
    }
}

impl BlobStore for FsBlobStore {
    fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        // Nothing can be stored under a malformed key.
        if !is_valid_key(key) {
            return Ok(None);
        }
        let path = self.blob_path(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PackError::Storage(format!("read blob {key}: {err}"))),
        };
        Ok(Some(BlobMetadata {
            size: bytes.len() as u64,
            integrity_hash: content_digest(&bytes),
        }))
    }

    fn get_url(&self, key: &str) -> Result<String> {
        self.url_for("", key)
    }

    fn generate_upload_url(&self) -> Result<UploadTicket> {
        let storage_key = Uuid::new_v4().to_string();
        Ok(UploadTicket {
            upload_url: self.url_for("upload/", &storage_key)?,
            storage_key,
        })
    }
}

/// In-memory store with hooks for simulating bad metadata and outages.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, BlobMetadata>>,
    failures: Mutex<u32>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bytes: &[u8]) -> String {
        let key = Uuid::new_v4().to_string();
        self.put_at(&key, bytes);
        key
    }

    pub fn put_at(&self, key: &str, bytes: &[u8]) {
        self.set_metadata(
            key,
            BlobMetadata {
                size: bytes.len() as u64,
                integrity_hash: content_digest(bytes),
            },
        );
    }

    /// Record metadata directly, e.g. a size that disagrees with the content.
    pub fn set_metadata(&self, key: &str, metadata: BlobMetadata) {
        self.blobs.lock().insert(key.to_string(), metadata);
    }

    pub fn remove(&self, key: &str) {
        self.blobs.lock().remove(key);
    }

    /// Make the next `count` metadata lookups fail with a storage error.
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }
}

impl BlobStore for MemoryBlobStore {
    fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(PackError::Storage(format!("blob store unavailable for {key}")));
            }
        }
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn get_url(&self, key: &str) -> Result<String> {
        Ok(format!("memory://blobs/{key}"))
    }

    fn generate_upload_url(&self) -> Result<UploadTicket> {
        let storage_key = Uuid::new_v4().to_string();
        Ok(UploadTicket {
            upload_url: format!("memory://upload/{storage_key}"),
            storage_key,
        })
    }
}

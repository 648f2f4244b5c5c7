//! Client-local publish ledger.
//!
//! Advisory history of archives produced on this machine. It never talks to the
//! registry and is not evidence of what was published remotely.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PackError, Result};
use crate::utils::fs::{ensure_dir, read_optional, write_atomic};
use crate::utils::version::compare_versions;

pub const LEDGER_FILE: &str = "ledger.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVersion {
    pub version: String,
    pub hash: String,
    pub size: u64,
    pub artifact: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSkill {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub versions: Vec<LedgerVersion>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    skills: BTreeMap<String, LedgerSkill>,
}

/// A new record to append.
#[derive(Debug, Clone)]
pub struct PublishRecord<'a> {
    pub slug: &'a str,
    pub name: &'a str,
    pub version: &'a str,
    pub hash: &'a str,
    pub size: u64,
    pub artifact: &'a str,
}

pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Ledger stored as `ledger.json` inside `root`.
    pub fn in_root(root: &Path) -> Self {
        Self::open(root.join(LEDGER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a version for `slug`, refusing a version string already present.
    pub fn record_publish(&self, record: &PublishRecord<'_>) -> Result<LedgerVersion> {
        self.record_with(record, || Ok(()))
    }

    /// Like `record_publish`, but runs `write_artifact` under the ledger lock
    /// after the duplicate check and before the entry is saved. A duplicate
    /// never reaches `write_artifact`; a failed write records nothing.
    pub fn record_with<F>(
        &self,
        record: &PublishRecord<'_>,
        write_artifact: F,
    ) -> Result<LedgerVersion>
    where
        F: FnOnce() -> Result<()>,
    {
        let _lock = self.lock()?;
        let mut doc = self.load()?;

        let skill = doc
            .skills
            .entry(record.slug.to_string())
            .or_insert_with(|| LedgerSkill {
                slug: record.slug.to_string(),
                name: record.name.to_string(),
                versions: Vec::new(),
            });

        if skill.versions.iter().any(|v| v.version == record.version) {
            return Err(PackError::DuplicateVersion {
                skill: record.slug.to_string(),
                version: record.version.to_string(),
            });
        }

        let entry = LedgerVersion {
            version: record.version.to_string(),
            hash: record.hash.to_string(),
            size: record.size,
            artifact: record.artifact.to_string(),
            published_at: Utc::now(),
        };
        skill.versions.push(entry.clone());

        write_artifact()?;
        self.save(&doc)?;
        info!(slug = record.slug, version = record.version, "ledger record appended");
        Ok(entry)
    }

    /// Locally known versions of `slug`, ascending by numeric-aware order.
    pub fn list_versions(&self, slug: &str) -> Result<Vec<LedgerVersion>> {
        let doc = self.load()?;
        let mut versions = doc
            .skills
            .get(slug)
            .map(|skill| skill.versions.clone())
            .unwrap_or_default();
        versions.sort_by(|a, b| compare_versions(&a.version, &b.version));
        Ok(versions)
    }

    pub fn get_skill(&self, slug: &str) -> Result<Option<LedgerSkill>> {
        Ok(self.load()?.skills.remove(slug))
    }

    fn load(&self) -> Result<LedgerDocument> {
        match read_optional(&self.path)? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(LedgerDocument::default()),
        }
    }

    fn save(&self, doc: &LedgerDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &json)
    }

    fn lock(&self) -> Result<LedgerLock> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        debug!(path = %lock_path.display(), "ledger lock acquired");
        Ok(LedgerLock { file })
    }
}

struct LedgerLock {
    file: File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!("failed to release ledger lock: {err}");
        }
    }
}

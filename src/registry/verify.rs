//! Verification engine.
//!
//! A run stores a `running` verification record, evaluates four independent
//! checks against the blob store, then applies the outcome in one transaction:
//! complete the record, move the version out of `pending`, and on success
//! assign the skill's default version when none is set yet.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PackError, Result};
use crate::pack::hash::digests_match;
use crate::pack::manifest::normalize_path;
use crate::registry::blob::{BlobMetadata, BlobStore, RetryPolicy, with_retry};
use crate::registry::clock::Clock;
use crate::registry::model::{
    SkillVersion, Verification, VerificationChecks, VerificationOutcome, VerificationStatus,
    VersionStatus,
};
use crate::storage::Database;
use crate::storage::sqlite;

/// Entry and file list pulled from a stored manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestShape {
    pub entry: String,
    pub files: Vec<String>,
}

/// Tagged result of reading the optional manifest JSON on a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestParse {
    Absent,
    Parsed(ManifestShape),
    Invalid(String),
}

impl ManifestParse {
    pub fn from_json(json: Option<&str>) -> Self {
        let Some(raw) = json else {
            return Self::Absent;
        };
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => return Self::Invalid(format!("manifest is not valid JSON: {err}")),
        };

        let entry = match value.get("entry").and_then(Value::as_str) {
            Some(entry) if !entry.trim().is_empty() => entry.to_string(),
            _ => return Self::Invalid("manifest entry must be a non-empty string".to_string()),
        };
        let files = match value.get("files").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>(),
            _ => return Self::Invalid("manifest files must be a non-empty list".to_string()),
        };
        Self::Parsed(ManifestShape { entry, files })
    }

    /// `Ok` when the manifest is absent or self-consistent.
    pub fn check(&self) -> std::result::Result<(), String> {
        match self {
            Self::Absent => Ok(()),
            Self::Invalid(reason) => Err(reason.clone()),
            Self::Parsed(shape) => {
                let entry = normalize_path(&shape.entry);
                if shape.files.iter().any(|f| normalize_path(f) == entry) {
                    Ok(())
                } else {
                    Err(format!("manifest entry '{entry}' is not listed in files"))
                }
            }
        }
    }
}

/// Checks and accumulated errors of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub checks: VerificationChecks,
    pub errors: Vec<String>,
}

impl Evaluation {
    pub const fn status(&self) -> VersionStatus {
        if self.errors.is_empty() {
            VersionStatus::Verified
        } else {
            VersionStatus::Rejected
        }
    }

    fn failed_checks(&self) -> Vec<&'static str> {
        let c = &self.checks;
        [
            ("hasStoredArtifact", c.has_stored_artifact),
            ("sizeMatches", c.size_matches),
            ("hashMatches", c.hash_matches),
            ("manifestValid", c.manifest_valid),
        ]
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Run every check against the stored metadata. Never short-circuits.
pub fn evaluate(version: &SkillVersion, metadata: Option<&BlobMetadata>) -> Evaluation {
    let mut eval = Evaluation::default();

    match metadata {
        Some(meta) => {
            eval.checks.has_stored_artifact = true;

            eval.checks.size_matches = meta.size == version.size_bytes;
            if !eval.checks.size_matches {
                eval.errors.push(format!(
                    "size mismatch: declared {} bytes, stored {} bytes",
                    version.size_bytes, meta.size
                ));
            }

            eval.checks.hash_matches = digests_match(&version.content_hash, &meta.integrity_hash);
            if !eval.checks.hash_matches {
                eval.errors.push(format!(
                    "hash mismatch: declared {}, stored {}",
                    version.content_hash, meta.integrity_hash
                ));
            }
        }
        None => {
            eval.errors.push(format!(
                "no stored artifact for storage key {}",
                version.storage_key
            ));
            eval.errors
                .push("size cannot be confirmed without a stored artifact".to_string());
            eval.errors
                .push("hash cannot be confirmed without a stored artifact".to_string());
        }
    }

    match ManifestParse::from_json(version.manifest_json.as_deref()).check() {
        Ok(()) => eval.checks.manifest_valid = true,
        Err(reason) => eval.errors.push(reason),
    }

    eval
}

pub struct VerificationEngine {
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl VerificationEngine {
    pub fn new(blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            blobs,
            clock,
            retry,
        }
    }

    /// Verify a pending version and persist the outcome.
    ///
    /// A `running` record is stored before the blob lookup and completed when
    /// the run ends. Returns `Ok(None)` when the version was no longer pending
    /// by the time the outcome was applied. A blob lookup that keeps failing
    /// completes the record as failed and returns a `pending` outcome; the
    /// version is left for `run_pending_verifications`.
    pub fn run(&self, db: &Database, version_id: &str) -> Result<Option<VerificationOutcome>> {
        let version = db
            .read(|conn| sqlite::get_version(conn, version_id))?
            .ok_or_else(|| PackError::NotFound(format!("version {version_id}")))?;
        if version.status != VersionStatus::Pending {
            debug!(version_id, status = %version.status, "skipping non-pending version");
            return Ok(None);
        }

        let mut record = Verification {
            id: Uuid::new_v4().to_string(),
            version_id: version.id.clone(),
            status: VerificationStatus::Running,
            checks: VerificationChecks::default(),
            errors: Vec::new(),
            started_at: self.clock.now(),
            completed_at: None,
        };
        db.with_tx(|tx| sqlite::insert_verification(tx, &record))?;
        debug!(version_id, verification_id = %record.id, "verification started");

        let metadata = match with_retry(&self.retry, "blob metadata lookup", || {
            self.blobs.get_metadata(&version.storage_key)
        }) {
            Ok(metadata) => metadata,
            Err(err) => return self.abort(db, &version, record, &err).map(Some),
        };
        let evaluation = evaluate(&version, metadata.as_ref());
        record.completed_at = Some(self.clock.now());

        let outcome = db.with_tx(|tx| apply(tx, &version, &evaluation, record))?;

        match &outcome {
            Some(outcome) if outcome.status == VersionStatus::Verified => info!(
                version_id,
                version = %version.version,
                became_default = outcome.became_default,
                "version verified"
            ),
            Some(outcome) => warn!(
                version_id,
                version = %version.version,
                failed = ?evaluation.failed_checks(),
                errors = outcome.errors.len(),
                "version rejected"
            ),
            None => debug!(version_id, "version resolved concurrently; outcome discarded"),
        }
        Ok(outcome)
    }

    fn abort(
        &self,
        db: &Database,
        version: &SkillVersion,
        mut record: Verification,
        err: &PackError,
    ) -> Result<VerificationOutcome> {
        record.status = VerificationStatus::Failed;
        record.errors = vec![format!("blob lookup failed: {err}")];
        record.completed_at = Some(self.clock.now());
        db.with_tx(|tx| sqlite::complete_verification(tx, &record))?;
        warn!(
            version_id = %version.id,
            error = %err,
            "verification aborted; version stays pending"
        );

        Ok(VerificationOutcome {
            version_id: version.id.clone(),
            version: version.version.clone(),
            status: VersionStatus::Pending,
            verification_id: record.id,
            checks: record.checks,
            errors: record.errors,
            became_default: false,
        })
    }
}

fn apply(
    tx: &rusqlite::Connection,
    version: &SkillVersion,
    evaluation: &Evaluation,
    mut record: Verification,
) -> Result<Option<VerificationOutcome>> {
    let status = evaluation.status();
    record.checks = evaluation.checks;

    let moved = sqlite::transition_status(
        tx,
        &version.id,
        VersionStatus::Pending,
        status,
        Some(&record.id),
    )?;
    if !moved {
        record.status = VerificationStatus::Failed;
        record.errors = vec!["version was resolved by another run".to_string()];
        sqlite::complete_verification(tx, &record)?;
        return Ok(None);
    }

    record.status = if status == VersionStatus::Verified {
        VerificationStatus::Passed
    } else {
        VerificationStatus::Failed
    };
    record.errors = evaluation.errors.clone();
    sqlite::complete_verification(tx, &record)?;

    let became_default = if status == VersionStatus::Verified {
        assign_default_if_unset(tx, &version.skill_id, &version.id)?
    } else {
        false
    };

    Ok(Some(VerificationOutcome {
        version_id: version.id.clone(),
        version: version.version.clone(),
        status,
        verification_id: record.id,
        checks: record.checks,
        errors: record.errors,
        became_default,
    }))
}

/// First verified version becomes the default. Never replaces an existing default.
pub fn assign_default_if_unset(
    tx: &rusqlite::Connection,
    skill_id: &str,
    version_id: &str,
) -> Result<bool> {
    let assigned = sqlite::set_default_if_unset(tx, skill_id, version_id)?;
    if assigned {
        info!(skill_id, version_id, "default version assigned");
    }
    Ok(assigned)
}

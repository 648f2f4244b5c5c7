//! Server-side version registry.
//!
//! Owns skills and their versions, gates every mutation behind identity,
//! ownership and a per-operation rate limit, and runs verification inline so
//! callers always receive the post-verification status of a publish.

pub mod auth;
pub mod blob;
pub mod clock;
pub mod model;
pub mod rate_limit;
pub mod verify;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, RateLimitsConfig};
use crate::error::{PackError, Result, ValidationError};
use crate::pack::hash::is_digest;
use crate::pack::manifest::validate_slug;
use crate::storage::{DATABASE_FILE, Database, sqlite};
use crate::utils::version::{compare_versions, is_strict_semver};

pub use auth::Actor;
pub use blob::{BlobMetadata, BlobStore, FsBlobStore, MemoryBlobStore, RetryPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use model::{
    BatchReport, DownloadTarget, PublishRequest, Skill, SkillVersion, StorageMode, UploadTicket,
    Verification, VerificationChecks, VerificationOutcome, VersionStatus, Visibility,
};
pub use rate_limit::{MemoryCounterStore, RateLimit, RateLimiter, SqliteCounterStore};
pub use verify::VerificationEngine;

/// Tunables the registry reads from configuration.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_artifact_bytes: u64,
    pub max_batch: usize,
    pub rate_limits: RateLimitsConfig,
    pub retry: RetryPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_artifact_bytes: config.limits.max_artifact_bytes,
            max_batch: config.limits.max_batch,
            rate_limits: config.rate_limits.clone(),
            retry: config.blob_store.retry_policy(),
        }
    }
}

/// Fields for a new skill.
#[derive(Debug, Clone, Default)]
pub struct NewSkill {
    pub slug: String,
    pub name: String,
    pub visibility: Visibility,
    pub storage_mode: StorageMode,
}

pub struct Registry {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    engine: VerificationEngine,
    settings: RegistrySettings,
}

impl Registry {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        limiter: RateLimiter,
        settings: RegistrySettings,
    ) -> Self {
        let engine = VerificationEngine::new(blobs.clone(), clock.clone(), settings.retry.clone());
        Self {
            db,
            blobs,
            clock,
            limiter,
            engine,
            settings,
        }
    }

    /// Registry backed by `<root>/registry.db`, with counters in the same file.
    pub fn open(root: &Path, blobs: Arc<dyn BlobStore>, settings: RegistrySettings) -> Result<Self> {
        let db_path = root.join(DATABASE_FILE);
        let db = Database::open(&db_path)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let limiter = RateLimiter::new(Box::new(SqliteCounterStore::open(&db_path)?), clock.clone());
        Ok(Self::new(db, blobs, clock, limiter, settings))
    }

    /// Fully in-memory registry.
    pub fn in_memory(
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: RegistrySettings,
    ) -> Result<Self> {
        let limiter = RateLimiter::new(Box::new(MemoryCounterStore::new()), clock.clone());
        Ok(Self::new(Database::open_in_memory()?, blobs, clock, limiter, settings))
    }

    pub const fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    fn enforce(&self, actor: &Actor, operation: &str, limit: RateLimit) -> Result<()> {
        self.limiter.enforce_operation(&actor.id, operation, limit)
    }

    // ---------------------------------------------------------------------
    // Skills
    // ---------------------------------------------------------------------

    pub fn create_skill(&self, actor: Option<&Actor>, new: NewSkill) -> Result<Skill> {
        let actor = auth::require_actor(actor)?;
        self.enforce(actor, "create_skill", self.settings.rate_limits.create_skill)?;

        validate_slug(&new.slug)?;
        if new.name.trim().is_empty() {
            return Err(ValidationError::MissingName.into());
        }

        let skill = Skill {
            id: Uuid::new_v4().to_string(),
            slug: new.slug,
            name: new.name.trim().to_string(),
            owner_id: actor.id.clone(),
            visibility: new.visibility,
            storage_mode: new.storage_mode,
            default_version_id: None,
            created_at: self.clock.now(),
        };

        self.db.with_tx(|tx| {
            if sqlite::slug_exists(tx, &skill.slug)? {
                return Err(ValidationError::field(
                    "slug",
                    format!("'{}' is already taken", skill.slug),
                )
                .into());
            }
            sqlite::insert_skill(tx, &skill)
        })?;

        info!(skill_id = %skill.id, slug = %skill.slug, owner = %skill.owner_id, "skill created");
        Ok(skill)
    }

    /// Delete a skill with all its versions and verification history.
    pub fn delete_skill(&self, actor: Option<&Actor>, skill_id: &str) -> Result<()> {
        let actor = auth::require_actor(actor)?;
        self.enforce(actor, "delete_skill", self.settings.rate_limits.delete_skill)?;

        self.db.with_tx(|tx| {
            let skill = load_skill(tx, skill_id)?;
            auth::require_owner(actor, &skill)?;
            sqlite::delete_skill(tx, skill_id)?;
            Ok(())
        })?;
        info!(skill_id, "skill deleted");
        Ok(())
    }

    pub fn get_skill(&self, skill_id: &str) -> Result<Skill> {
        self.db.read(|conn| load_skill(conn, skill_id))
    }

    pub fn get_skill_by_slug(&self, slug: &str) -> Result<Skill> {
        self.db
            .read(|conn| sqlite::get_skill_by_slug(conn, slug))?
            .ok_or_else(|| PackError::NotFound(format!("skill {slug}")))
    }

    pub fn generate_upload_url(&self, actor: Option<&Actor>) -> Result<UploadTicket> {
        let actor = auth::require_actor(actor)?;
        self.enforce(
            actor,
            "generate_upload_url",
            self.settings.rate_limits.generate_upload_url,
        )?;
        self.blobs.generate_upload_url()
    }

    // ---------------------------------------------------------------------
    // Versions
    // ---------------------------------------------------------------------

    /// Insert a pending version and verify it before returning.
    ///
    /// A version string already present for the skill fails with
    /// `DuplicateVersion`; nothing is overwritten. Once the record is inserted
    /// the call succeeds: a rejected artifact returns `rejected` with the
    /// reasons, and an unreachable blob store returns `pending`.
    pub fn publish_version(
        &self,
        actor: Option<&Actor>,
        request: PublishRequest,
    ) -> Result<VerificationOutcome> {
        let actor = auth::require_actor(actor)?;
        self.enforce(actor, "publish_version", self.settings.rate_limits.publish_version)?;
        self.validate_publish(&request)?;

        let record = SkillVersion {
            id: Uuid::new_v4().to_string(),
            skill_id: request.skill_id,
            version: request.version,
            changelog: request.changelog,
            storage_key: request.storage_key,
            content_hash: request.content_hash,
            size_bytes: request.size_bytes,
            manifest_json: request.manifest_json,
            published_by: actor.id.clone(),
            status: VersionStatus::Pending,
            verification_id: None,
            published_at: self.clock.now(),
        };

        self.db.with_tx(|tx| {
            let skill = load_skill(tx, &record.skill_id)?;
            auth::require_owner(actor, &skill)?;
            if !skill.storage_mode.supports_versions() {
                return Err(ValidationError::field(
                    "storage_mode",
                    format!("{} skills do not accept published versions", skill.storage_mode),
                )
                .into());
            }
            if sqlite::version_exists(tx, &skill.id, &record.version)? {
                return Err(PackError::DuplicateVersion {
                    skill: skill.slug,
                    version: record.version.clone(),
                });
            }
            sqlite::insert_version(tx, &record)
                .map_err(|err| sqlite::map_unique_violation(err, &skill.slug, &record.version))
        })?;

        info!(
            skill_id = %record.skill_id,
            version_id = %record.id,
            version = %record.version,
            "version published; verifying"
        );
        self.verify_now(&record.id)
    }

    fn validate_publish(&self, request: &PublishRequest) -> Result<()> {
        if !is_strict_semver(&request.version) {
            return Err(ValidationError::InvalidVersion(request.version.clone()).into());
        }
        if request.size_bytes == 0 || request.size_bytes > self.settings.max_artifact_bytes {
            return Err(ValidationError::field(
                "size_bytes",
                format!(
                    "must be between 1 and {} bytes",
                    self.settings.max_artifact_bytes
                ),
            )
            .into());
        }
        if !is_digest(&request.content_hash) {
            return Err(
                ValidationError::field("content_hash", "expected 64 hex characters").into(),
            );
        }
        if !blob::is_valid_key(&request.storage_key) {
            return Err(ValidationError::field(
                "storage_key",
                "expected 1-128 characters of [A-Za-z0-9_-]",
            )
            .into());
        }
        Ok(())
    }

    /// Point the skill's default at a verified version.
    pub fn set_default_version(
        &self,
        actor: Option<&Actor>,
        skill_id: &str,
        version_id: &str,
    ) -> Result<Skill> {
        let actor = auth::require_actor(actor)?;
        self.enforce(
            actor,
            "set_default_version",
            self.settings.rate_limits.set_default_version,
        )?;

        let skill = self.db.with_tx(|tx| {
            let skill = load_skill(tx, skill_id)?;
            auth::require_owner(actor, &skill)?;
            let version = load_version_of(tx, &skill, version_id)?;
            if version.status != VersionStatus::Verified {
                return Err(PackError::NotVerified {
                    version_id: version.id,
                    status: version.status.to_string(),
                });
            }
            sqlite::set_default_version(tx, &skill.id, &version.id)?;
            Ok(Skill {
                default_version_id: Some(version.id),
                ..skill
            })
        })?;
        info!(skill_id, version_id, "default version set");
        Ok(skill)
    }

    /// Reset a version to pending and verify it again, keeping prior history.
    ///
    /// If the version is the current default, the pointer is cleared for the
    /// duration of the run; a passing run restores it through the first
    /// verified version rule.
    pub fn reverify_version(
        &self,
        actor: Option<&Actor>,
        skill_id: &str,
        version_id: &str,
    ) -> Result<VerificationOutcome> {
        let actor = auth::require_actor(actor)?;
        self.enforce(actor, "reverify_version", self.settings.rate_limits.reverify_version)?;

        self.db.with_tx(|tx| {
            let skill = load_skill(tx, skill_id)?;
            auth::require_owner(actor, &skill)?;
            let version = load_version_of(tx, &skill, version_id)?;
            sqlite::reset_to_pending(tx, &version.id)?;
            if sqlite::clear_default_if(tx, &skill.id, &version.id)? {
                info!(skill_id, version_id, "default cleared pending re-verification");
            }
            Ok(())
        })?;

        self.verify_now(version_id)
    }

    fn verify_now(&self, version_id: &str) -> Result<VerificationOutcome> {
        match self.engine.run(&self.db, version_id)? {
            Some(outcome) => Ok(outcome),
            None => self.current_outcome(version_id),
        }
    }

    /// Outcome as recorded by the latest verification of `version_id`.
    fn current_outcome(&self, version_id: &str) -> Result<VerificationOutcome> {
        let version = self.get_version(version_id)?;
        let latest = self.verification_history(version_id)?.pop();
        let skill = self.get_skill(&version.skill_id)?;
        Ok(VerificationOutcome {
            became_default: skill.default_version_id.as_deref() == Some(version_id),
            version_id: version.id,
            version: version.version,
            status: version.status,
            verification_id: latest.as_ref().map(|v| v.id.clone()).unwrap_or_default(),
            checks: latest.as_ref().map(|v| v.checks).unwrap_or_default(),
            errors: latest.map(|v| v.errors).unwrap_or_default(),
        })
    }

    /// Resolve which verified version to serve and its URL.
    ///
    /// Explicit version first, then the default pointer, then the highest
    /// verified version by numeric-aware ordering. Private skills resolve only
    /// for their owner.
    pub fn get_version_download_url(
        &self,
        actor: Option<&Actor>,
        skill_id: &str,
        version: Option<&str>,
    ) -> Result<DownloadTarget> {
        let (skill, chosen) = self.db.read(|conn| {
            let skill = visible_skill(conn, actor, skill_id)?;
            let chosen = match version {
                Some(requested) => sqlite::get_version_by_string(conn, &skill.id, requested)?
                    .filter(|v| v.status == VersionStatus::Verified)
                    .ok_or_else(|| {
                        PackError::NotFound(format!(
                            "verified version {requested} of skill {}",
                            skill.slug
                        ))
                    })?,
                None => resolve_default_or_latest(conn, &skill)?,
            };
            Ok((skill, chosen))
        })?;

        Ok(DownloadTarget {
            url: self.blobs.get_url(&chosen.storage_key)?,
            skill_id: skill.id,
            version_id: chosen.id,
            version: chosen.version,
            content_hash: chosen.content_hash,
            size_bytes: chosen.size_bytes,
        })
    }

    /// All versions of a skill, highest first.
    pub fn list_versions(&self, actor: Option<&Actor>, skill_id: &str) -> Result<Vec<SkillVersion>> {
        self.db.read(|conn| {
            let skill = visible_skill(conn, actor, skill_id)?;
            let mut versions = sqlite::list_versions(conn, &skill.id)?;
            versions.sort_by(|a, b| compare_versions(&b.version, &a.version));
            Ok(versions)
        })
    }

    pub fn get_version(&self, version_id: &str) -> Result<SkillVersion> {
        self.db
            .read(|conn| sqlite::get_version(conn, version_id))?
            .ok_or_else(|| PackError::NotFound(format!("version {version_id}")))
    }

    /// Every verification run of a version, oldest first.
    pub fn verification_history(&self, version_id: &str) -> Result<Vec<Verification>> {
        self.db.read(|conn| sqlite::list_verifications(conn, version_id))
    }

    /// Verify up to `limit` pending versions, one at a time, oldest first.
    ///
    /// Versions whose blob lookup still fails stay pending and are counted as
    /// scanned but not processed.
    pub fn run_pending_verifications(&self, limit: usize) -> Result<BatchReport> {
        if limit == 0 {
            return Err(ValidationError::field("limit", "must be at least 1").into());
        }
        let limit = limit.min(self.settings.max_batch);
        let mut queue: VecDeque<String> = self
            .db
            .read(|conn| sqlite::pending_version_ids(conn, limit))?
            .into();

        let mut report = BatchReport {
            scanned: queue.len(),
            ..BatchReport::default()
        };

        while let Some(version_id) = queue.pop_front() {
            match self.engine.run(&self.db, &version_id) {
                Ok(Some(outcome)) => match outcome.status {
                    VersionStatus::Verified => {
                        report.processed += 1;
                        report.verified += 1;
                    }
                    VersionStatus::Rejected => {
                        report.processed += 1;
                        report.rejected += 1;
                    }
                    VersionStatus::Pending => {}
                },
                Ok(None) => {}
                Err(err) => {
                    warn!(version_id = %version_id, error = %err, "verification deferred");
                }
            }
        }

        info!(
            scanned = report.scanned,
            processed = report.processed,
            verified = report.verified,
            rejected = report.rejected,
            "pending verification batch finished"
        );
        Ok(report)
    }
}

/// Load a skill, hiding private skills from everyone but their owner.
fn visible_skill(
    conn: &rusqlite::Connection,
    actor: Option<&Actor>,
    skill_id: &str,
) -> Result<Skill> {
    let skill = load_skill(conn, skill_id)?;
    let is_owner = actor.is_some_and(|a| a.id == skill.owner_id);
    if skill.visibility == Visibility::Private && !is_owner {
        return Err(PackError::NotFound(format!("skill {skill_id}")));
    }
    Ok(skill)
}

fn load_skill(conn: &rusqlite::Connection, skill_id: &str) -> Result<Skill> {
    sqlite::get_skill(conn, skill_id)?
        .ok_or_else(|| PackError::NotFound(format!("skill {skill_id}")))
}

fn load_version_of(
    conn: &rusqlite::Connection,
    skill: &Skill,
    version_id: &str,
) -> Result<SkillVersion> {
    sqlite::get_version(conn, version_id)?
        .filter(|v| v.skill_id == skill.id)
        .ok_or_else(|| {
            PackError::NotFound(format!("version {version_id} of skill {}", skill.slug))
        })
}

fn resolve_default_or_latest(conn: &rusqlite::Connection, skill: &Skill) -> Result<SkillVersion> {
    if let Some(default_id) = &skill.default_version_id {
        let default = sqlite::get_version(conn, default_id)?
            .filter(|v| v.status == VersionStatus::Verified);
        if let Some(default) = default {
            return Ok(default);
        }
    }
    sqlite::list_versions_with_status(conn, &skill.id, VersionStatus::Verified)?
        .into_iter()
        .max_by(|a, b| compare_versions(&a.version, &b.version))
        .ok_or_else(|| PackError::NotFound(format!("no verified version of skill {}", skill.slug)))
}

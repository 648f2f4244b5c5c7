//! skillpack registry - Skills, versions and verification against the local registry

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, check_mark, emit_human, emit_robot, robot_ok};
use crate::error::{PackError, Result};
use crate::pack::content_digest;
use crate::registry::{
    Actor, NewSkill, PublishRequest, Registry, Skill, SkillVersion, StorageMode, Visibility,
};
use crate::registry::model::VerificationOutcome;

#[derive(Args, Debug)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub command: RegistryCommand,
}

#[derive(Subcommand, Debug)]
pub enum RegistryCommand {
    /// Register a new skill owned by the current actor
    CreateSkill(CreateSkillArgs),

    /// Delete a skill with all of its versions
    DeleteSkill(SkillRef),

    /// Store a file in the blob store and print its storage key
    Upload(UploadArgs),

    /// Publish a version and verify it immediately
    Publish(PublishArgs),

    /// Point the skill's default at a verified version
    SetDefault(VersionRef),

    /// Re-run verification for a version
    Reverify(VersionRef),

    /// Resolve the download URL for a version (default or latest verified)
    DownloadUrl(DownloadArgs),

    /// List versions of a skill, newest first
    Versions(SkillRef),

    /// Show verification history of a version
    Verifications(VersionRef),

    /// Verify pending versions, oldest first
    VerifyPending(VerifyPendingArgs),
}

#[derive(Args, Debug)]
pub struct SkillRef {
    /// Skill id or slug
    pub skill: String,
}

#[derive(Args, Debug)]
#[command(disable_version_flag = true)]
pub struct VersionRef {
    /// Skill id or slug
    pub skill: String,
    /// Version string or version id
    pub version: String,
}

#[derive(Args, Debug)]
pub struct CreateSkillArgs {
    pub slug: String,

    /// Display name (default: the slug)
    #[arg(long)]
    pub name: Option<String>,

    /// public or private
    #[arg(long, default_value = "public")]
    pub visibility: String,

    /// hosted or linked
    #[arg(long, default_value = "hosted")]
    pub storage_mode: String,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    pub file: PathBuf,
}

#[derive(Args, Debug)]
#[command(disable_version_flag = true)]
pub struct PublishArgs {
    /// Skill id or slug
    pub skill: String,
    pub version: String,

    /// Upload this artifact first and take key, hash and size from it
    #[arg(long, conflicts_with_all = ["storage_key", "hash", "size"])]
    pub artifact: Option<PathBuf>,

    /// Storage key of an uploaded artifact
    #[arg(long, requires_all = ["hash", "size"])]
    pub storage_key: Option<String>,

    /// Declared SHA-256 hex digest
    #[arg(long)]
    pub hash: Option<String>,

    /// Declared size in bytes
    #[arg(long)]
    pub size: Option<u64>,

    #[arg(long)]
    pub changelog: Option<String>,

    /// Manifest JSON file to store with the version
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[command(disable_version_flag = true)]
pub struct DownloadArgs {
    /// Skill id or slug
    pub skill: String,

    /// Exact version (must be verified)
    #[arg(long)]
    pub version: Option<String>,
}

#[derive(Args, Debug)]
pub struct VerifyPendingArgs {
    /// Maximum versions to process
    #[arg(long, default_value_t = 25)]
    pub limit: usize,
}

#[derive(Serialize)]
struct UploadReport {
    storage_key: String,
    upload_url: String,
    sha256: String,
    size: u64,
}

pub fn run(ctx: &AppContext, args: &RegistryArgs) -> Result<()> {
    let registry = ctx.registry()?;
    let actor = ctx.actor();

    match &args.command {
        RegistryCommand::CreateSkill(args) => {
            let skill = registry.create_skill(
                actor,
                NewSkill {
                    slug: args.slug.clone(),
                    name: args.name.clone().unwrap_or_else(|| args.slug.clone()),
                    visibility: args.visibility.parse::<Visibility>()?,
                    storage_mode: args.storage_mode.parse::<StorageMode>()?,
                },
            )?;
            emit_skill(ctx, &skill)
        }
        RegistryCommand::DeleteSkill(args) => {
            let skill = resolve_skill(&registry, &args.skill)?;
            registry.delete_skill(actor, &skill.id)?;
            if ctx.robot_mode {
                return emit_robot(&robot_ok(serde_json::json!({ "deleted": skill.id })));
            }
            println!("Deleted {} ({})", skill.slug, skill.id);
            Ok(())
        }
        RegistryCommand::Upload(args) => {
            let report = upload(ctx, &registry, actor, &args.file)?;
            if ctx.robot_mode {
                return emit_robot(&robot_ok(report));
            }
            let mut layout = HumanLayout::new();
            layout
                .title("Uploaded")
                .kv("Storage key", &report.storage_key)
                .kv("Upload URL", &report.upload_url)
                .kv("SHA-256", &report.sha256)
                .kv("Size", &format!("{} bytes", report.size));
            emit_human(layout);
            Ok(())
        }
        RegistryCommand::Publish(args) => {
            let skill = resolve_skill(&registry, &args.skill)?;
            let (storage_key, content_hash, size_bytes) = match &args.artifact {
                Some(path) => {
                    let report = upload(ctx, &registry, actor, path)?;
                    (report.storage_key, report.sha256, report.size)
                }
                None => (
                    args.storage_key.clone().unwrap_or_default(),
                    args.hash.clone().unwrap_or_default(),
                    args.size.unwrap_or_default(),
                ),
            };
            let manifest_json = args
                .manifest
                .as_ref()
                .map(std::fs::read_to_string)
                .transpose()?;

            let outcome = registry.publish_version(
                actor,
                PublishRequest {
                    skill_id: skill.id,
                    version: args.version.clone(),
                    changelog: args.changelog.clone(),
                    storage_key,
                    content_hash,
                    size_bytes,
                    manifest_json,
                },
            )?;
            emit_outcome(ctx, &outcome)
        }
        RegistryCommand::SetDefault(args) => {
            let (skill, version) = resolve_version(&registry, actor, &args.skill, &args.version)?;
            let skill = registry.set_default_version(actor, &skill.id, &version.id)?;
            emit_skill(ctx, &skill)
        }
        RegistryCommand::Reverify(args) => {
            let (skill, version) = resolve_version(&registry, actor, &args.skill, &args.version)?;
            let outcome = registry.reverify_version(actor, &skill.id, &version.id)?;
            emit_outcome(ctx, &outcome)
        }
        RegistryCommand::DownloadUrl(args) => {
            let skill = resolve_skill(&registry, &args.skill)?;
            let target =
                registry.get_version_download_url(actor, &skill.id, args.version.as_deref())?;
            if ctx.robot_mode {
                return emit_robot(&robot_ok(target));
            }
            println!("{}", target.url);
            Ok(())
        }
        RegistryCommand::Versions(args) => {
            let skill = resolve_skill(&registry, &args.skill)?;
            let versions = registry.list_versions(actor, &skill.id)?;
            if ctx.robot_mode {
                return emit_robot(&robot_ok(versions));
            }
            let mut layout = HumanLayout::new();
            layout.title(&format!("Versions of {}", skill.slug));
            for version in &versions {
                let marker = if skill.default_version_id.as_deref() == Some(version.id.as_str()) {
                    " (default)"
                } else {
                    ""
                };
                layout.bullet(&format!(
                    "{}  {}  {}{marker}",
                    version.version, version.status, version.id
                ));
            }
            emit_human(layout);
            Ok(())
        }
        RegistryCommand::Verifications(args) => {
            let (_, version) = resolve_version(&registry, actor, &args.skill, &args.version)?;
            let history = registry.verification_history(&version.id)?;
            if ctx.robot_mode {
                return emit_robot(&robot_ok(history));
            }
            let mut layout = HumanLayout::new();
            layout.title(&format!("Verifications of {}", version.version));
            for run in &history {
                layout.bullet(&format!(
                    "{}  {}  {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.status,
                    run.id
                ));
                for error in &run.errors {
                    layout.push_line(format!("    {error}"));
                }
            }
            emit_human(layout);
            Ok(())
        }
        RegistryCommand::VerifyPending(args) => {
            let report = registry.run_pending_verifications(args.limit)?;
            if ctx.robot_mode {
                return emit_robot(&robot_ok(report));
            }
            let mut layout = HumanLayout::new();
            layout
                .title("Pending verification")
                .kv("Scanned", &report.scanned.to_string())
                .kv("Processed", &report.processed.to_string())
                .kv("Verified", &report.verified.to_string())
                .kv("Rejected", &report.rejected.to_string());
            emit_human(layout);
            Ok(())
        }
    }
}

fn upload(
    ctx: &AppContext,
    registry: &Registry,
    actor: Option<&Actor>,
    path: &std::path::Path,
) -> Result<UploadReport> {
    let bytes = std::fs::read(path)?;
    let ticket = registry.generate_upload_url(actor)?;
    ctx.blob_store()?.put_at(&ticket.storage_key, &bytes)?;
    Ok(UploadReport {
        storage_key: ticket.storage_key,
        upload_url: ticket.upload_url,
        sha256: content_digest(&bytes),
        size: bytes.len() as u64,
    })
}

/// Look a skill up by id, then by slug.
fn resolve_skill(registry: &Registry, key: &str) -> Result<Skill> {
    match registry.get_skill(key) {
        Err(PackError::NotFound(_)) => registry.get_skill_by_slug(key),
        other => other,
    }
}

fn resolve_version(
    registry: &Registry,
    actor: Option<&Actor>,
    skill: &str,
    version: &str,
) -> Result<(Skill, SkillVersion)> {
    let skill = resolve_skill(registry, skill)?;
    let found = registry
        .list_versions(actor, &skill.id)?
        .into_iter()
        .find(|v| v.version == version || v.id == version)
        .ok_or_else(|| PackError::NotFound(format!("version {version} of {}", skill.slug)))?;
    Ok((skill, found))
}

fn emit_skill(ctx: &AppContext, skill: &Skill) -> Result<()> {
    if ctx.robot_mode {
        return emit_robot(&robot_ok(skill));
    }
    let mut layout = HumanLayout::new();
    layout
        .title(&skill.name)
        .kv("Id", &skill.id)
        .kv("Slug", &skill.slug)
        .kv("Owner", &skill.owner_id)
        .kv("Visibility", skill.visibility.as_str())
        .kv("Storage mode", skill.storage_mode.as_str())
        .kv(
            "Default version",
            skill.default_version_id.as_deref().unwrap_or("-"),
        );
    emit_human(layout);
    Ok(())
}

fn emit_outcome(ctx: &AppContext, outcome: &VerificationOutcome) -> Result<()> {
    if ctx.robot_mode {
        return emit_robot(&robot_ok(outcome));
    }
    let checks = &outcome.checks;
    let mut layout = HumanLayout::new();
    layout
        .title(&format!("{} {}", outcome.version, outcome.status))
        .kv("Version id", &outcome.version_id)
        .kv("Verification", &outcome.verification_id)
        .kv("Default", if outcome.became_default { "assigned" } else { "unchanged" })
        .blank()
        .section("Checks")
        .kv("stored artifact", &check_mark(checks.has_stored_artifact))
        .kv("size", &check_mark(checks.size_matches))
        .kv("hash", &check_mark(checks.hash_matches))
        .kv("manifest", &check_mark(checks.manifest_valid));
    if !outcome.errors.is_empty() {
        layout.blank().section("Errors");
        for error in &outcome.errors {
            layout.bullet(error);
        }
    }
    emit_human(layout);
    Ok(())
}

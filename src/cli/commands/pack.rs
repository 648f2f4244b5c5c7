//! skillpack pack - Build a tar artifact from a skill directory

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::error::Result;
use crate::pack::{PublishRecord, pack_directory};

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Skill directory
    pub dir: PathBuf,

    /// Manifest file name inside the directory
    #[arg(long)]
    pub manifest: Option<String>,

    /// Output path (default: <output_dir>/<slug>-<version>.tar)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Fixed modification time (seconds since epoch) for reproducible output
    #[arg(long)]
    pub mtime: Option<u64>,

    /// Append the build to the local publish ledger
    #[arg(long)]
    pub record: bool,
}

#[derive(Serialize)]
struct PackReport {
    slug: String,
    version: String,
    artifact: String,
    digest: String,
    size: u64,
    entries: Vec<String>,
    recorded: bool,
}

pub fn run(ctx: &AppContext, args: &PackArgs) -> Result<()> {
    let mut options = ctx.config.archive_options();
    if let Some(manifest) = &args.manifest {
        options.manifest_file.clone_from(manifest);
    }
    options.mtime = args.mtime;

    let (manifest, archive) = pack_directory(&args.dir, options)?;

    let output = match &args.output {
        Some(path) => path.clone(),
        None => default_output(
            ctx.config.pack.output_dir.as_deref(),
            &manifest.slug,
            &manifest.version,
        ),
    };
    let artifact = output.display().to_string();

    if args.record {
        let record = PublishRecord {
            slug: &manifest.slug,
            name: &manifest.name,
            version: &manifest.version,
            hash: &archive.digest,
            size: archive.size(),
            artifact: &artifact,
        };
        ctx.ledger()
            .record_with(&record, || archive.write_to(&output))?;
    } else {
        archive.write_to(&output)?;
    }

    let report = PackReport {
        slug: manifest.slug,
        version: manifest.version,
        artifact,
        digest: archive.digest.clone(),
        size: archive.size(),
        entries: archive.paths.clone(),
        recorded: args.record,
    };

    if ctx.robot_mode {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout
        .title(&format!("Packed {}@{}", report.slug, report.version))
        .kv("Artifact", &report.artifact)
        .kv("SHA-256", &report.digest)
        .kv("Size", &format!("{} bytes", report.size))
        .kv("Entries", &report.entries.len().to_string());
    if report.recorded {
        layout.kv("Ledger", &ctx.ledger().path().display().to_string());
    }
    emit_human(layout);
    Ok(())
}

fn default_output(output_dir: Option<&Path>, slug: &str, version: &str) -> PathBuf {
    let file = format!("{slug}-{version}.tar");
    match output_dir {
        Some(dir) => dir.join(file),
        None => PathBuf::from(file),
    }
}

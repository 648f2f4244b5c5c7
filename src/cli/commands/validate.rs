//! skillpack validate - Check a manifest against the validation rules

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::error::Result;
use crate::pack::Manifest;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Manifest file, or a skill directory containing one
    pub manifest: PathBuf,
}

#[derive(Serialize)]
struct ValidateReport<'a> {
    path: String,
    valid: bool,
    slug: &'a str,
    version: &'a str,
    files: usize,
}

pub fn run(ctx: &AppContext, args: &ValidateArgs) -> Result<()> {
    let path = manifest_path(&args.manifest, &ctx.config.pack.manifest_file);
    let manifest = Manifest::from_path(&path)?;
    manifest.validate()?;

    let report = ValidateReport {
        path: path.display().to_string(),
        valid: true,
        slug: &manifest.slug,
        version: &manifest.version,
        files: manifest.files.len(),
    };

    if ctx.robot_mode {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout
        .title("Manifest valid")
        .kv("Path", &report.path)
        .kv("Name", &manifest.name)
        .kv("Slug", report.slug)
        .kv("Version", report.version)
        .kv("Entry", &manifest.entry)
        .kv("Files", &report.files.to_string());
    emit_human(layout);
    Ok(())
}

fn manifest_path(input: &Path, manifest_file: &str) -> PathBuf {
    if input.is_dir() {
        input.join(manifest_file)
    } else {
        input.to_path_buf()
    }
}

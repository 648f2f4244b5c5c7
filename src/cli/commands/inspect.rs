//! skillpack inspect - List the entries of an artifact

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::error::Result;
use crate::pack::archive::{ArchiveEntry, read_entries};
use crate::pack::content_digest;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Archive file
    pub archive: PathBuf,
}

#[derive(Serialize)]
struct InspectReport {
    path: String,
    digest: String,
    size: u64,
    entries: Vec<ArchiveEntry>,
}

pub fn run(ctx: &AppContext, args: &InspectArgs) -> Result<()> {
    let bytes = std::fs::read(&args.archive)?;
    let report = InspectReport {
        path: args.archive.display().to_string(),
        digest: content_digest(&bytes),
        size: bytes.len() as u64,
        entries: read_entries(&bytes)?,
    };

    if ctx.robot_mode {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout
        .title(&report.path)
        .kv("SHA-256", &report.digest)
        .kv("Size", &format!("{} bytes", report.size))
        .blank()
        .section("Entries");
    for entry in &report.entries {
        layout.bullet(&format!(
            "{} ({} bytes, mode {:o})",
            entry.path, entry.size, entry.mode
        ));
    }
    emit_human(layout);
    Ok(())
}

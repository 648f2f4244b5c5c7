//! skillpack history - Locally recorded builds of a skill

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::error::Result;
use crate::pack::LedgerVersion;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Skill slug
    pub slug: String,
}

#[derive(Serialize)]
struct HistoryReport {
    slug: String,
    versions: Vec<LedgerVersion>,
}

pub fn run(ctx: &AppContext, args: &HistoryArgs) -> Result<()> {
    let versions = ctx.ledger().list_versions(&args.slug)?;

    if ctx.robot_mode {
        return emit_robot(&robot_ok(HistoryReport {
            slug: args.slug.clone(),
            versions,
        }));
    }

    let mut layout = HumanLayout::new();
    layout.title(&format!("History for {}", args.slug));
    if versions.is_empty() {
        layout.push_line("No recorded versions.");
    }
    for entry in &versions {
        layout.bullet(&format!(
            "{}  {}  {} bytes  {}",
            entry.version,
            entry.published_at.format("%Y-%m-%d %H:%M:%S"),
            entry.size,
            entry.hash
        ));
    }
    emit_human(layout);
    Ok(())
}

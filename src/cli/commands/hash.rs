//! skillpack hash - Content digest of a file

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{emit_robot, robot_ok};
use crate::error::Result;
use crate::pack::hash::file_digest;

#[derive(Args, Debug)]
pub struct HashArgs {
    /// File to hash
    pub file: PathBuf,
}

#[derive(Serialize)]
struct HashReport {
    path: String,
    sha256: String,
    size: u64,
}

pub fn run(ctx: &AppContext, args: &HashArgs) -> Result<()> {
    let sha256 = file_digest(&args.file)?;
    let size = std::fs::metadata(&args.file)?.len();

    if ctx.robot_mode {
        return emit_robot(&robot_ok(HashReport {
            path: args.file.display().to_string(),
            sha256,
            size,
        }));
    }

    println!("{sha256}  {}", args.file.display());
    Ok(())
}

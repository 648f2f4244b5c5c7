//! Command implementations

use crate::app::AppContext;
use crate::cli::Commands;
use crate::error::Result;

pub mod hash;
pub mod history;
pub mod inspect;
pub mod pack;
pub mod registry;
pub mod validate;

pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Validate(args) => validate::run(ctx, args),
        Commands::Pack(args) => pack::run(ctx, args),
        Commands::Hash(args) => hash::run(ctx, args),
        Commands::Inspect(args) => inspect::run(ctx, args),
        Commands::History(args) => history::run(ctx, args),
        Commands::Registry(args) => registry::run(ctx, args),
    }
}

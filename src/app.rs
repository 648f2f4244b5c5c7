//! Per-invocation application context shared by CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::{PackError, Result};
use crate::pack::Ledger;
use crate::registry::{Actor, FsBlobStore, Registry, RegistrySettings};
use crate::utils::fs::ensure_dir;

pub struct AppContext {
    /// Data directory holding the ledger, registry database and blobs.
    pub root: PathBuf,
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub robot_mode: bool,
    pub verbosity: u8,
    pub actor: Option<Actor>,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let root = match &cli.root {
            Some(root) => root.clone(),
            None => default_root()?,
        };
        let config = Config::load(cli.config.as_deref(), &root)?;
        let actor = cli
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Actor::new);

        debug!(root = %root.display(), actor = ?actor.as_ref().map(|a| &a.id), "context ready");

        Ok(Self {
            root,
            config,
            config_path: cli.config.clone(),
            robot_mode: cli.robot,
            verbosity: cli.verbose,
            actor,
        })
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::in_root(&self.root)
    }

    pub fn blob_store(&self) -> Result<FsBlobStore> {
        let blob_root = self
            .config
            .blob_store
            .root
            .clone()
            .unwrap_or_else(|| self.root.clone());
        Ok(FsBlobStore::open(blob_root)?.with_base_url(self.config.blob_store.base_url.clone()))
    }

    pub fn registry(&self) -> Result<Registry> {
        ensure_dir(&self.root)?;
        let blobs = Arc::new(self.blob_store()?);
        Registry::open(&self.root, blobs, RegistrySettings::from_config(&self.config))
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn default_root() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("skillpack"))
        .ok_or_else(|| PackError::Config("cannot determine data directory; pass --root".into()))
}

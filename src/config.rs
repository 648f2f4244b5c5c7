use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};
use crate::pack::archive::{ArchiveOptions, DEFAULT_FILE_MODE, DEFAULT_MAX_ARTIFACT_BYTES};
use crate::pack::manifest::MANIFEST_FILE;
use crate::registry::blob::RetryPolicy;
use crate::registry::rate_limit::RateLimit;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    #[serde(default)]
    pub pack: PackConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path (argument or `SKILLPACK_CONFIG`) replaces the global and
    /// project files. Otherwise `~/.config/skillpack/config.toml` is applied,
    /// then `<root>/config.toml`. `SKILLPACK_*` variables are applied last.
    pub fn load(explicit_path: Option<&Path>, root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("SKILLPACK_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            match Self::load_patch(&path)? {
                Some(patch) => config.merge_patch(patch),
                None => {
                    return Err(PackError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_project(root)? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        let Some(dir) = dirs::config_dir() else {
            return Ok(None);
        };
        Self::load_patch(&dir.join("skillpack/config.toml"))
    }

    fn load_project(root: &Path) -> Result<Option<ConfigPatch>> {
        Self::load_patch(&root.join("config.toml"))
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| PackError::Config(format!("read config {}: {err}", path.display())))?;
        Self::parse_patch(&raw)
            .map(Some)
            .map_err(|err| PackError::Config(format!("parse config {}: {err}", path.display())))
    }

    fn parse_patch(raw: &str) -> std::result::Result<ConfigPatch, toml::de::Error> {
        toml::from_str(raw)
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.limits {
            self.limits.merge(patch);
        }
        if let Some(patch) = patch.rate_limits {
            self.rate_limits.merge(patch);
        }
        if let Some(patch) = patch.blob_store {
            self.blob_store.merge(patch);
        }
        if let Some(patch) = patch.pack {
            self.pack.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_u64("SKILLPACK_MAX_ARTIFACT_BYTES")? {
            self.limits.max_artifact_bytes = value;
        }
        if let Some(value) = env_u64("SKILLPACK_BLOB_TIMEOUT_MS")? {
            self.blob_store.timeout_ms = value;
        }
        if let Some(value) = env_u32("SKILLPACK_BLOB_RETRIES")? {
            self.blob_store.retries = value;
        }
        if let Some(value) = env_string("SKILLPACK_BLOB_BASE_URL") {
            self.blob_store.base_url = Some(value).filter(|v| !v.trim().is_empty());
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.limits.max_artifact_bytes == 0 {
            return Err(PackError::Config(
                "limits.max_artifact_bytes must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_batch == 0 {
            return Err(PackError::Config(
                "limits.max_batch must be greater than zero".to_string(),
            ));
        }
        for (name, limit) in self.rate_limits.entries() {
            if limit.window_ms <= 0 {
                return Err(PackError::Config(format!(
                    "rate_limits.{name}.window_ms must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Archive options derived from `[pack]` and `[limits]`.
    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            manifest_file: self.pack.manifest_file.clone(),
            file_mode: self.pack.file_mode,
            mtime: None,
            max_bytes: self.limits.max_artifact_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_artifact_bytes: u64,
    pub max_batch: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            max_batch: 25,
        }
    }
}

impl LimitsConfig {
    fn merge(&mut self, patch: LimitsPatch) {
        if let Some(value) = patch.max_artifact_bytes {
            self.max_artifact_bytes = value;
        }
        if let Some(value) = patch.max_batch {
            self.max_batch = value;
        }
    }
}

/// Budgets for each mutating registry operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    pub create_skill: RateLimit,
    pub publish_version: RateLimit,
    pub set_default_version: RateLimit,
    pub reverify_version: RateLimit,
    pub delete_skill: RateLimit,
    pub generate_upload_url: RateLimit,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            create_skill: RateLimit::new(5, 60_000),
            publish_version: RateLimit::new(5, 60_000),
            set_default_version: RateLimit::new(10, 60_000),
            reverify_version: RateLimit::new(5, 60_000),
            delete_skill: RateLimit::new(10, 60_000),
            generate_upload_url: RateLimit::new(20, 60_000),
        }
    }
}

impl RateLimitsConfig {
    pub fn entries(&self) -> [(&'static str, RateLimit); 6] {
        [
            ("create_skill", self.create_skill),
            ("publish_version", self.publish_version),
            ("set_default_version", self.set_default_version),
            ("reverify_version", self.reverify_version),
            ("delete_skill", self.delete_skill),
            ("generate_upload_url", self.generate_upload_url),
        ]
    }

    fn merge(&mut self, patch: RateLimitsPatch) {
        merge_rate_limit(&mut self.create_skill, patch.create_skill);
        merge_rate_limit(&mut self.publish_version, patch.publish_version);
        merge_rate_limit(&mut self.set_default_version, patch.set_default_version);
        merge_rate_limit(&mut self.reverify_version, patch.reverify_version);
        merge_rate_limit(&mut self.delete_skill, patch.delete_skill);
        merge_rate_limit(&mut self.generate_upload_url, patch.generate_upload_url);
    }
}

fn merge_rate_limit(target: &mut RateLimit, patch: Option<RateLimitPatch>) {
    let Some(patch) = patch else {
        return;
    };
    if let Some(limit) = patch.limit {
        target.limit = limit;
    }
    if let Some(window_ms) = patch.window_ms {
        target.window_ms = window_ms;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Blob directory root; defaults to the skillpack root.
    pub root: Option<PathBuf>,
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            base_url: None,
            timeout_ms: 10_000,
            retries: 2,
            retry_backoff_ms: 100,
        }
    }
}

impl BlobStoreConfig {
    fn merge(&mut self, patch: BlobStorePatch) {
        if let Some(value) = patch.root {
            self.root = Some(value);
        }
        if let Some(value) = patch.base_url {
            self.base_url = Some(value);
        }
        if let Some(value) = patch.timeout_ms {
            self.timeout_ms = value;
        }
        if let Some(value) = patch.retries {
            self.retries = value;
        }
        if let Some(value) = patch.retry_backoff_ms {
            self.retry_backoff_ms = value;
        }
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    pub manifest_file: String,
    pub file_mode: u32,
    pub output_dir: Option<PathBuf>,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            manifest_file: MANIFEST_FILE.to_string(),
            file_mode: DEFAULT_FILE_MODE,
            output_dir: None,
        }
    }
}

impl PackConfig {
    fn merge(&mut self, patch: PackPatch) {
        if let Some(value) = patch.manifest_file {
            self.manifest_file = value;
        }
        if let Some(value) = patch.file_mode {
            self.file_mode = value;
        }
        if let Some(value) = patch.output_dir {
            self.output_dir = Some(value);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub limits: Option<LimitsPatch>,
    pub rate_limits: Option<RateLimitsPatch>,
    pub blob_store: Option<BlobStorePatch>,
    pub pack: Option<PackPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LimitsPatch {
    pub max_artifact_bytes: Option<u64>,
    pub max_batch: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RateLimitsPatch {
    pub create_skill: Option<RateLimitPatch>,
    pub publish_version: Option<RateLimitPatch>,
    pub set_default_version: Option<RateLimitPatch>,
    pub reverify_version: Option<RateLimitPatch>,
    pub delete_skill: Option<RateLimitPatch>,
    pub generate_upload_url: Option<RateLimitPatch>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct RateLimitPatch {
    pub limit: Option<u32>,
    pub window_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BlobStorePatch {
    pub root: Option<PathBuf>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PackPatch {
    pub manifest_file: Option<String>,
    pub file_mode: Option<u32>,
    pub output_dir: Option<PathBuf>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|err| PackError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|err| PackError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

//! Tar archive construction with path-safety enforcement.
//!
//! The manifest is always the first entry. Declared files follow in manifest
//! order. Headers use the ustar layout with zero uid/gid, a fixed mode and a
//! caller-chosen mtime, so fixing the mtime makes the output bit-reproducible.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tar::{Builder, EntryType, Header};
use tracing::{debug, info};

use crate::error::{PackError, Result, ValidationError};
use crate::pack::hash::content_digest;
use crate::pack::manifest::{MANIFEST_FILE, Manifest, normalize_path};

/// Default maximum archive size (10 MiB).
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 10 * 1024 * 1024;

/// Default mode written into every file header.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Name of the manifest entry inside the archive.
    pub manifest_file: String,
    pub file_mode: u32,
    /// Modification time in seconds since the epoch; `None` means build time.
    pub mtime: Option<u64>,
    pub max_bytes: u64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            manifest_file: MANIFEST_FILE.to_string(),
            file_mode: DEFAULT_FILE_MODE,
            mtime: None,
            max_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
        }
    }
}

/// A finished archive and its content digest.
#[derive(Debug, Clone)]
pub struct Archive {
    pub bytes: Vec<u8>,
    pub digest: String,
    /// Entry names in archive order, manifest first.
    pub paths: Vec<String>,
}

impl Archive {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Read the entry table back with a standard tar reader.
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        read_entries(&self.bytes)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        crate::utils::fs::write_atomic(path, &self.bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: u64,
}

/// List the regular-file entries of a tar byte buffer.
pub fn read_entries(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive = tar::Archive::new(Cursor::new(bytes));
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        if header.entry_type() != EntryType::Regular {
            continue;
        }
        out.push(ArchiveEntry {
            path: entry.path()?.to_string_lossy().into_owned(),
            size: header.size()?,
            mode: header.mode()?,
            mtime: header.mtime()?,
        });
    }
    Ok(out)
}

/// Builds archives from a base directory.
pub struct ArchiveBuilder {
    base: PathBuf,
    options: ArchiveOptions,
}

impl ArchiveBuilder {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            options: ArchiveOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ArchiveOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn with_mtime(mut self, mtime: u64) -> Self {
        self.options.mtime = Some(mtime);
        self
    }

    /// Validate the manifest, collect every declared file and emit the archive.
    ///
    /// Any unsafe or missing path aborts the whole build; no partial archive
    /// is returned.
    pub fn build(&self, manifest: &Manifest) -> Result<Archive> {
        manifest.validate()?;

        let base = self.base.canonicalize().map_err(|err| {
            PackError::NotFound(format!("base directory {}: {err}", self.base.display()))
        })?;

        let manifest_name = normalize_path(&self.options.manifest_file);
        let mut staged: Vec<(String, Vec<u8>)> = Vec::with_capacity(manifest.files.len() + 1);
        staged.push((manifest_name.clone(), manifest.to_json_string()?.into_bytes()));

        for declared in &manifest.files {
            let relative = check_relative_path(declared)?;
            if relative == manifest_name {
                debug!(path = %relative, "manifest listed in files; already first entry");
                continue;
            }
            let resolved = resolve_under(&base, &relative)?;
            let bytes = std::fs::read(&resolved)?;
            staged.push((relative, bytes));
        }

        let mtime = self.options.mtime.unwrap_or_else(now_secs);
        let bytes = write_tar(&staged, self.options.file_mode, mtime)?;

        if bytes.len() as u64 > self.options.max_bytes {
            return Err(ValidationError::field(
                "archive",
                format!(
                    "{} bytes exceeds the {} byte limit",
                    bytes.len(),
                    self.options.max_bytes
                ),
            )
            .into());
        }

        let digest = content_digest(&bytes);
        let paths: Vec<String> = staged.into_iter().map(|(path, _)| path).collect();
        info!(
            slug = %manifest.slug,
            version = %manifest.version,
            files = paths.len(),
            bytes = bytes.len(),
            digest = %digest,
            "archive built"
        );
        Ok(Archive {
            bytes,
            digest,
            paths,
        })
    }
}

/// Normalize a declared path and reject traversal shapes.
pub fn check_relative_path(declared: &str) -> Result<String> {
    let path = normalize_path(declared);
    let traversal = path.starts_with('/')
        || path.starts_with("..")
        || path.contains("/../")
        || path.ends_with("/..")
        || path.contains('\0');
    if traversal {
        return Err(PackError::PathTraversal(path));
    }
    Ok(path)
}

/// Resolve `relative` under `base` (already canonical) and require a regular file.
pub fn resolve_under(base: &Path, relative: &str) -> Result<PathBuf> {
    let joined = base.join(relative);
    let resolved = joined.canonicalize().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            PackError::NotFound(format!("declared file {relative}"))
        } else {
            PackError::Io(err)
        }
    })?;
    if !resolved.starts_with(base) {
        return Err(PackError::PathEscape(resolved));
    }
    if !resolved.is_file() {
        return Err(PackError::NotAFile(resolved));
    }
    Ok(resolved)
}

fn write_tar(entries: &[(String, Vec<u8>)], mode: u32, mtime: u64) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    for (path, bytes) in entries {
        let mut header = Header::new_ustar();
        set_entry_name(&mut header, path);
        header.set_size(bytes.len() as u64);
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(mode);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append(&header, bytes.as_slice())?;
    }
    Ok(builder.into_inner()?)
}

/// Set the entry name, falling back to truncation into the 100-byte name field
/// when the path cannot be split across the ustar prefix.
fn set_entry_name(header: &mut Header, path: &str) {
    if header.set_path(path).is_ok() {
        return;
    }
    if let Some(ustar) = header.as_ustar_mut() {
        ustar.prefix = [0; 155];
        ustar.name = [0; 100];
        let raw = path.as_bytes();
        let len = raw.len().min(ustar.name.len());
        ustar.name[..len].copy_from_slice(&raw[..len]);
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

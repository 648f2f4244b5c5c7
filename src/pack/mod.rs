//! Client-side packaging: manifest validation, archive building, hashing and
//! the local publish ledger.

pub mod archive;
pub mod hash;
pub mod ledger;
pub mod manifest;

use std::path::Path;

pub use archive::{Archive, ArchiveBuilder, ArchiveEntry, ArchiveOptions};
pub use hash::content_digest;
pub use ledger::{Ledger, LedgerSkill, LedgerVersion, PublishRecord};
pub use manifest::Manifest;

use crate::error::Result;

/// Read the manifest from `dir` and build its archive.
pub fn pack_directory(dir: &Path, options: ArchiveOptions) -> Result<(Manifest, Archive)> {
    let manifest = Manifest::from_path(&dir.join(&options.manifest_file))?;
    let archive = ArchiveBuilder::new(dir)
        .with_options(options)
        .build(&manifest)?;
    Ok((manifest, archive))
}

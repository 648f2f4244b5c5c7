//! skillpack - skill packaging and a verified skill registry.
//!
//! The `pack` half turns a skill directory into a reproducible tar artifact.
//! The `registry` half stores versions, verifies them against blob storage and
//! resolves what clients download.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod pack;
pub mod registry;
pub mod storage;
pub mod test_utils;
pub mod utils;

pub use error::{PackError, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

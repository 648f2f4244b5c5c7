//! Shared helpers.

pub mod fs;
pub mod version;

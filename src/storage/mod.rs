//! Storage layer for the registry
//!
//! SQLite holds skills, versions, verification history and rate-limit counters.

pub mod migrations;
pub mod sqlite;

pub use sqlite::{DATABASE_FILE, Database};

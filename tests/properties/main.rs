//! Property-based tests for path safety and version ordering.

mod path_safety;
mod version_ordering;

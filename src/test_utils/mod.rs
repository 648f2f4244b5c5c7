//! Shared test utilities for skillpack.

pub mod fixtures;

#[cfg(test)]
pub mod arbitrary;

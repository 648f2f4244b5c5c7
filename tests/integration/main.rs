//! Integration tests for packaging and registry flows.

mod fixture;
mod persistence;
mod rate_limiting;
mod registry_flows;

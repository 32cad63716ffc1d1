//! Common test utilities for tariff-core integration tests

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{init_tracing, start_time, Catalog, TestEnv};

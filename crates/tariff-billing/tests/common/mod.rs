//! Common test utilities for tariff-billing integration tests

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{
    customer_event, event, init_tracing, invoice_object, subscription_object, ts, TestEnv,
    NEXT_PERIOD_END, PERIOD_END, PERIOD_START,
};

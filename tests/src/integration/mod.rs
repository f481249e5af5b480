//! End-to-end tests against a live broker.

pub mod concurrency;
pub mod daemon;
pub mod scenarios;

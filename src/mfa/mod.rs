//! Second-factor gateway: credential records, single-use challenges, rate
//! limits, and ceremony verification.

pub mod engine;
pub mod models;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

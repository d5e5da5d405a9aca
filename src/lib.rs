//! Soft-expiry cache: serve stale values while one background refresh
//! recomputes them.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;

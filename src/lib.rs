//! Ratewarden - Sliding-Window Rate Limiting
//!
//! This crate enforces per-identifier request quotas over a sliding time
//! window. Window state lives in a shared store (Redis in production) and
//! every check-and-update runs as one atomic transaction there, so limits
//! hold across any number of stateless service instances.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

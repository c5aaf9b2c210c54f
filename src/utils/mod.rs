//! Shared helpers.
//!
//! Retry classification and backoff schedules, plus binary bootstrap.

pub mod bootstrap;
pub mod retry;

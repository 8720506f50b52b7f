//! Application processing engine for multi-tenant school enrollment.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;

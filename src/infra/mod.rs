//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod revisions;
pub mod telemetry;

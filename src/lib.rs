//! Revision-keyed bootstrap document cache with pub/sub invalidation.
//!
//! The [`bootstrap`] module holds the library surface. [`config`] and
//! [`infra`] back the `bootdoc` binary, whose failures surface as
//! [`error::AppError`].

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod infra;

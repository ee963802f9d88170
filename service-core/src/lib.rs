//! service-core: shared infrastructure for the nestory services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

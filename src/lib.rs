//! GraphQL result caching with node-level invalidation.

pub mod cache;
pub mod config;
pub mod infra;

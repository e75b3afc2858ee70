//! Runtime bootstrap and offline tooling around the cache engine.

pub mod error;
pub mod scenario;
pub mod telemetry;

//! Inventory collection engine for AWS describe/list APIs
//!
//! Configured regions and endpoints expand into independent jobs. Each job
//! runs with its own credentials and streams one JSON document per result
//! page.

pub mod aws;
pub mod collector;
pub mod config;
pub mod error;
pub mod resource;

#[cfg(test)]
mod test_helpers;

pub use collector::Collector;
pub use config::{CollectorConfig, Settings};
pub use error::CollectorError;
pub use resource::{ChunkStream, JobDescriptor};

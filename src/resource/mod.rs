//! Resource abstraction layer
//!
//! Endpoint definitions are loaded from JSON files at compile time, so new
//! describe/list operations can be added without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches endpoint definitions from embedded JSON
//! - [`jobs`] - Expands configured regions and endpoints into jobs
//! - [`fetcher`] - Runs one endpoint as a lazy, page-at-a-time record stream
//! - [`serializer`] - Turns records into standalone JSON chunks
//!
//! # Endpoint Definitions
//!
//! Endpoints are defined in JSON files under `src/resources/`:
//! - `ec2.json` - EC2 describe operations
//! - `elb.json` - Classic and application/network load balancers
//! - `iam.json` - IAM list operations
//! - `services.json` - RDS, Lambda, CloudFront and S3

pub mod fetcher;
pub mod jobs;
pub mod registry;
pub mod serializer;

pub use fetcher::{execute, RecordStream};
pub use jobs::{enumerate_jobs, JobDescriptor};
pub use registry::{
    get_all_endpoint_names, get_endpoint, resolve, EndpointDef, ExecutionMode, PaginatorDef,
};
pub use serializer::{serialize, ChunkStream};

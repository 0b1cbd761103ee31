//! AWS API interaction module
//!
//! Provides the provider-facing half of the collector: credential
//! resolution, the STS token exchange, and a signed HTTP client.
//!
//! # Module Structure
//!
//! - [`auth`] - Credential bundles, resolution, and the ambient chain
//! - [`client`] - Region/credential scoped service clients and their factory
//! - [`http`] - SigV4 signing, per-service endpoints, response decoding
//! - [`sts`] - AssumeRole token exchange
//!
//! # Example
//!
//! ```ignore
//! use aws_descriptions::aws::client::{ClientFactory, HttpClientFactory};
//! use aws_descriptions::aws::http::{ApiRequest, ServiceFamily};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let factory = HttpClientFactory::new(None, None)?;
//!     let client = factory.client("us-east-1", None);
//!     let regions = client.call(ApiRequest::new(ServiceFamily::Ec2, "DescribeRegions")).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod sts;

pub use auth::{resolve_credentials, Credentials};
pub use client::{ClientFactory, HttpClientFactory, ServiceApi};
pub use http::{ApiRequest, ServiceFamily};
pub use sts::{AssumeRoleRequest, StsTokenExchange, TokenExchange};

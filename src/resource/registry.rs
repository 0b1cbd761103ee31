//! Endpoint Registry - Load endpoint definitions from JSON
//!
//! Maps a logical endpoint identifier (`service_operation`) to the service
//! operation behind it and whether that operation paginates. Definitions are
//! embedded at compile time and parsed once on first access.

use crate::aws::http::{ApiRequest, ServiceFamily};
use crate::error::CollectorError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded endpoint JSON files (compiled into the binary)
const ENDPOINT_FILES: &[&str] = &[
    include_str!("../resources/ec2.json"),
    include_str!("../resources/elb.json"),
    include_str!("../resources/iam.json"),
    include_str!("../resources/services.json"),
];

/// How an endpoint is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Provider-native pagination, one record per page
    Paginated,
    /// One request, one record
    Single,
}

/// Pagination parameters of a paginated operation
#[derive(Debug, Clone, Deserialize)]
pub struct PaginatorDef {
    /// Request parameter carrying the page size
    pub page_size: String,
    /// Request parameter carrying the continuation token
    pub input_token: String,
    /// Response field holding the next token (dot-separated path)
    pub output_token: String,
}

/// Endpoint definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointDef {
    /// Registry key, filled in after parsing
    #[serde(skip)]
    pub name: String,
    pub service: ServiceFamily,
    pub operation: String,
    /// Request path for REST-style services
    #[serde(default)]
    pub http_path: Option<String>,
    #[serde(default)]
    pub paginator: Option<PaginatorDef>,
}

impl EndpointDef {
    pub fn mode(&self) -> ExecutionMode {
        if self.paginator.is_some() {
            ExecutionMode::Paginated
        } else {
            ExecutionMode::Single
        }
    }

    /// Build a request for this operation
    pub fn request(&self, params: Vec<(String, String)>) -> ApiRequest {
        ApiRequest::new(self.service, &self.operation)
            .with_path(self.http_path.as_deref())
            .with_params(params)
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<EndpointConfig> = OnceLock::new();

/// Get the endpoint registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static EndpointConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = EndpointConfig {
            endpoints: HashMap::new(),
        };

        for content in ENDPOINT_FILES {
            let partial: EndpointConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded endpoint JSON: {}", e));

            for (name, mut def) in partial.endpoints {
                def.name = name.clone();
                if final_config.endpoints.insert(name.clone(), def).is_some() {
                    panic!("Duplicate endpoint definition: {}", name);
                }
            }
        }

        final_config
    })
}

/// Get an endpoint definition by name
pub fn get_endpoint(name: &str) -> Option<&'static EndpointDef> {
    get_registry().endpoints.get(name)
}

/// Resolve an endpoint or fail with `UnknownEndpoint`
pub fn resolve(name: &str) -> Result<&'static EndpointDef, CollectorError> {
    get_endpoint(name).ok_or_else(|| CollectorError::UnknownEndpoint(name.to_string()))
}

/// Get all endpoint names, sorted (for listing)
pub fn get_all_endpoint_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = get_registry()
        .endpoints
        .keys()
        .map(|s| s.as_str())
        .collect();
    names.sort_unstable();
    names
}

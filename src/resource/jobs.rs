//! Job enumeration
//!
//! One job per (region, endpoint) pair: region outer, endpoint inner, in
//! configuration order. Duplicates are kept and nothing is validated here.

use serde::{Deserialize, Serialize};

/// Unit of work handed from enumeration to collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub region: String,
    pub endpoint: String,
}

impl JobDescriptor {
    pub fn new(region: &str, endpoint: &str) -> Self {
        Self {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

/// Cross product of `regions` x `endpoints`
pub fn enumerate_jobs<'a>(
    regions: &'a [String],
    endpoints: &'a [String],
) -> impl Iterator<Item = JobDescriptor> + 'a {
    regions.iter().flat_map(move |region| {
        endpoints
            .iter()
            .map(move |endpoint| JobDescriptor::new(region, endpoint))
    })
}

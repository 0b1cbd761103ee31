//! STS token exchange
//!
//! Trades a long-lived identity for short-lived role credentials via
//! `AssumeRole`.

use super::auth::{credentials_from_document, Credentials};
use super::client::ClientFactory;
use super::http::{ApiRequest, ServiceFamily};
use crate::config::AssumeRoleSettings;
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;

/// Session name attached to every assumed-role session
pub const ASSUME_ROLE_SESSION_NAME: &str = "aws_descriptions_collector";

/// Duration requested from STS. The configured duration is not forwarded.
pub const ASSUME_ROLE_DURATION_SECONDS: u32 = 900;

/// Parameters of one `AssumeRole` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub external_id: Option<String>,
    pub duration_seconds: u32,
}

impl AssumeRoleRequest {
    pub fn for_role(role: &AssumeRoleSettings) -> Self {
        Self {
            role_arn: role.role_arn.clone(),
            session_name: ASSUME_ROLE_SESSION_NAME.to_string(),
            external_id: role.external_id.clone(),
            duration_seconds: ASSUME_ROLE_DURATION_SECONDS,
        }
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("RoleArn".to_string(), self.role_arn.clone()),
            ("RoleSessionName".to_string(), self.session_name.clone()),
            ("DurationSeconds".to_string(), self.duration_seconds.to_string()),
        ];
        if let Some(external_id) = &self.external_id {
            params.push(("ExternalId".to_string(), external_id.clone()));
        }
        params
    }
}

/// Identity/security-token service collaborator
pub trait TokenExchange: Send + Sync {
    /// Exchange `source` (or the ambient chain when `None`) for role credentials
    fn assume_role<'a>(
        &'a self,
        region: &'a str,
        source: Option<Credentials>,
        request: &'a AssumeRoleRequest,
    ) -> BoxFuture<'a, Result<Credentials>>;
}

/// `TokenExchange` backed by the regional STS endpoint
pub struct StsTokenExchange {
    clients: Arc<dyn ClientFactory>,
}

impl StsTokenExchange {
    pub fn new(clients: Arc<dyn ClientFactory>) -> Self {
        Self { clients }
    }
}

impl TokenExchange for StsTokenExchange {
    fn assume_role<'a>(
        &'a self,
        region: &'a str,
        source: Option<Credentials>,
        request: &'a AssumeRoleRequest,
    ) -> BoxFuture<'a, Result<Credentials>> {
        async move {
            let client = self.clients.client(region, source);
            let response = client
                .call(ApiRequest::new(ServiceFamily::Sts, "AssumeRole").with_params(request.params()))
                .await
                .with_context(|| format!("STS AssumeRole failed for {}", request.role_arn))?;

            parse_assume_role_response(&response)
        }
        .boxed()
    }
}

/// Extract credentials from a decoded `AssumeRoleResult`
fn parse_assume_role_response(result: &Value) -> Result<Credentials> {
    let document = result
        .get("Credentials")
        .ok_or_else(|| anyhow!("Credentials not found in AssumeRole response"))?;

    let credentials = credentials_from_document(document, "SessionToken")
        .context("Malformed AssumeRole response")?;

    if credentials.session_token.is_none() {
        return Err(anyhow!("SessionToken not found in AssumeRole response"));
    }

    Ok(credentials)
}

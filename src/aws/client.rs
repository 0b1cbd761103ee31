//! AWS Client
//!
//! Service clients are built per execution, scoped to one region and one
//! credential bundle. The factory is the seam executions are tested through.

use super::auth::Credentials;
use super::http::{ApiRequest, AwsHttpClient};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A service client bound to a region and credentials
pub trait ServiceApi: Send + Sync {
    /// Issue one request; resolves to the decoded response
    fn call(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>>;
}

/// Builds service clients for an execution
pub trait ClientFactory: Send + Sync {
    /// `credentials: None` leaves resolution to the ambient chain
    fn client(&self, region: &str, credentials: Option<Credentials>) -> Arc<dyn ServiceApi>;
}

impl ServiceApi for AwsHttpClient {
    fn call(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>> {
        async move {
            self.send(&request)
                .await
                .with_context(|| format!("{} {} in {}", request.service, request.action, self.region()))
        }
        .boxed()
    }
}

/// Factory producing signed HTTP clients that share one connection pool
#[derive(Clone)]
pub struct HttpClientFactory {
    http: Client,
    endpoint_url: Option<String>,
}

impl HttpClientFactory {
    pub fn new(endpoint_url: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to create HTTP client")?;

        Ok(Self { http, endpoint_url })
    }
}

impl ClientFactory for HttpClientFactory {
    fn client(&self, region: &str, credentials: Option<Credentials>) -> Arc<dyn ServiceApi> {
        Arc::new(AwsHttpClient::new(
            self.http.clone(),
            region,
            credentials,
            self.endpoint_url.clone(),
        ))
    }
}

/// Format AWS errors into short operator-facing messages
pub fn format_aws_error(err: &anyhow::Error) -> String {
    let err_str = format!("{:#}", err);

    if err_str.contains("InvalidClientTokenId") || err_str.contains("SignatureDoesNotMatch") {
        return "Invalid credentials - check access key configuration".to_string();
    }
    if err_str.contains("ExpiredToken") {
        return "Credentials expired - refresh or reconfigure".to_string();
    }
    if err_str.contains("AccessDenied") || err_str.contains("UnauthorizedOperation") {
        return "Access denied - check IAM permissions".to_string();
    }
    if err_str.contains("No credentials") {
        return "No credentials - configure keys, a profile, or an instance role".to_string();
    }
    if err_str.contains("Throttling") || err_str.contains("RequestLimitExceeded") {
        return "Rate limit exceeded - reduce concurrency".to_string();
    }
    if err_str.contains("timed out") {
        return "Request timed out - check connectivity".to_string();
    }

    if err_str.chars().count() > 120 {
        format!("{}...", err_str.chars().take(120).collect::<String>())
    } else {
        err_str
    }
}

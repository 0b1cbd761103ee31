//! In-memory collaborators for unit tests

use crate::aws::auth::Credentials;
use crate::aws::client::{ClientFactory, ServiceApi};
use crate::aws::http::ApiRequest;
use crate::aws::sts::{AssumeRoleRequest, TokenExchange};
use crate::config::{Authentication, Settings, DEFAULT_BATCH_SIZE};
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Auto-mode settings with default batch size and no role
pub fn settings(regions: &[&str], endpoints: &[&str]) -> Settings {
    Settings {
        regions: regions.iter().map(|s| s.to_string()).collect(),
        endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
        batch_size: DEFAULT_BATCH_SIZE,
        authentication: Authentication::Auto,
        assume_role: None,
        endpoint_url: None,
        request_timeout: None,
    }
}

type ExchangeCall = (String, Option<Credentials>, AssumeRoleRequest);

/// Token exchange handing out numbered credentials
#[derive(Default)]
pub struct MockExchange {
    failure: Option<String>,
    calls: Mutex<Vec<ExchangeCall>>,
}

impl MockExchange {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl TokenExchange for MockExchange {
    fn assume_role<'a>(
        &'a self,
        region: &'a str,
        source: Option<Credentials>,
        request: &'a AssumeRoleRequest,
    ) -> BoxFuture<'a, Result<Credentials>> {
        async move {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((region.to_string(), source, request.clone()));
                calls.len()
            };
            tokio::task::yield_now().await;

            match &self.failure {
                Some(message) => Err(anyhow!("{}", message)),
                None => Ok(Credentials::new(&format!("ASIA{}", n), &format!("secret-{}", n))
                    .with_session_token(format!("token-{}", n))),
            }
        }
        .boxed()
    }
}

/// One request seen by a [`MockProvider`] client
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub region: String,
    pub credentials: Option<Credentials>,
    pub request: ApiRequest,
}

#[derive(Default)]
struct ProviderState {
    responses: HashMap<String, VecDeque<Result<Value, String>>>,
    calls: Vec<RecordedCall>,
}

/// Scripted provider: queued responses per action, every call recorded
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl MockProvider {
    pub fn respond(&self, action: &str, response: Value) -> &Self {
        self.push(action, Ok(response))
    }

    pub fn fail(&self, action: &str, message: &str) -> &Self {
        self.push(action, Err(message.to_string()))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn push(&self, action: &str, response: Result<Value, String>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(action.to_string())
            .or_default()
            .push_back(response);
        self
    }
}

impl ClientFactory for MockProvider {
    fn client(&self, region: &str, credentials: Option<Credentials>) -> Arc<dyn ServiceApi> {
        Arc::new(MockClient {
            region: region.to_string(),
            credentials,
            state: Arc::clone(&self.state),
        })
    }
}

struct MockClient {
    region: String,
    credentials: Option<Credentials>,
    state: Arc<Mutex<ProviderState>>,
}

impl ServiceApi for MockClient {
    fn call(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>> {
        async move {
            tokio::task::yield_now().await;

            let mut state = self.state.lock().unwrap();
            let next = state
                .responses
                .get_mut(&request.action)
                .and_then(|queue| queue.pop_front());
            state.calls.push(RecordedCall {
                region: self.region.clone(),
                credentials: self.credentials.clone(),
                request: request.clone(),
            });

            match next {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(anyhow!("{}", message)),
                None => Err(anyhow!("no response queued for {}", request.action)),
            }
        }
        .boxed()
    }
}

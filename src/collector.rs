//! Collector facade
//!
//! The host-facing surface: `initialize` once, `enumerate` the jobs, then
//! `collect` each job (concurrently if the host wants). Every `collect` is an
//! independent execution with its own credentials and service client; the
//! only shared state is the immutable settings snapshot.

use crate::aws::auth::resolve_credentials;
use crate::aws::client::{ClientFactory, HttpClientFactory};
use crate::aws::sts::{StsTokenExchange, TokenExchange};
use crate::config::{CollectorConfig, Settings};
use crate::error::CollectorError;
use crate::resource::{enumerate_jobs, execute, resolve, serialize, ChunkStream, JobDescriptor};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct Collector {
    settings: Arc<Settings>,
    clients: Arc<dyn ClientFactory>,
    exchange: Arc<dyn TokenExchange>,
}

impl Collector {
    /// Validate `config` and wire the HTTP-backed collaborators
    pub fn initialize(config: CollectorConfig) -> Result<Self, CollectorError> {
        let settings = config.validate()?;

        let factory = HttpClientFactory::new(settings.endpoint_url.clone(), settings.request_timeout)
            .map_err(|e| CollectorError::configuration(format!("{:#}", e)))?;
        let clients: Arc<dyn ClientFactory> = Arc::new(factory);
        let exchange = Arc::new(StsTokenExchange::new(Arc::clone(&clients)));

        info!(
            "Collector initialized: {} regions, {} endpoints, batch size {}",
            settings.regions.len(),
            settings.endpoints.len(),
            settings.batch_size
        );

        Ok(Self::with_collaborators(settings, clients, exchange))
    }

    /// Build a collector over explicit collaborators
    pub fn with_collaborators(
        settings: Settings,
        clients: Arc<dyn ClientFactory>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            clients,
            exchange,
        }
    }

    /// One job per configured (region, endpoint) pair, region-major
    pub fn enumerate(&self) -> Vec<JobDescriptor> {
        enumerate_jobs(&self.settings.regions, &self.settings.endpoints).collect()
    }

    /// Start one execution for `job`.
    ///
    /// Fails before any network call when the endpoint is unknown. Credential
    /// failures surface here; provider failures surface on the returned stream.
    pub async fn collect(&self, job: &JobDescriptor) -> Result<ChunkStream, CollectorError> {
        let execution_id = Uuid::new_v4();
        let span = info_span!(
            "collect",
            %execution_id,
            region = %job.region,
            endpoint = %job.endpoint
        );

        async move {
            let endpoint = resolve(&job.endpoint)?;

            let credentials =
                resolve_credentials(&self.settings, &job.region, self.exchange.as_ref()).await?;
            debug!(
                "Credentials resolved ({})",
                if credentials.is_some() { "scoped" } else { "ambient" }
            );

            let client = self.clients.client(&job.region, credentials);
            info!("Starting {:?} collection", endpoint.mode());

            let records = execute(endpoint, client, &job.region, self.settings.batch_size);
            Ok(serialize(records))
        }
        .instrument(span)
        .await
    }
}

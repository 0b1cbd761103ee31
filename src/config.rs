//! Configuration Management
//!
//! `CollectorConfig` is the raw configuration as handed over by the host
//! (a JSON or YAML document). `validate` turns it into `Settings`, the
//! immutable snapshot every execution reads from.

use crate::aws::Credentials;
use crate::error::CollectorError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Page size requested when `batchSize` is absent
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Session duration assumed when none is configured
pub const DEFAULT_SESSION_DURATION_SECONDS: u32 = 900;

/// STS accepts 15 minutes up to 12 hours
const SESSION_DURATION_RANGE: std::ops::RangeInclusive<u32> = 900..=43_200;

/// How the collector obtains its base identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationMode {
    /// Ambient provider chain (environment, profile, instance role)
    #[default]
    Auto,
    /// Static access key and secret from configuration
    #[serde(alias = "manual")]
    Explicit,
}

/// Raw collector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorConfig {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default, alias = "awsAuthenticationMethod")]
    pub authentication_mode: AuthenticationMode,
    #[serde(default, alias = "enableAssumeRole")]
    pub assume_role_enabled: bool,
    #[serde(default, alias = "awsApiKey")]
    pub static_access_key: Option<String>,
    #[serde(default, alias = "awsSecretKey")]
    pub static_secret_key: Option<String>,
    #[serde(default)]
    pub assume_role_arn: Option<String>,
    #[serde(default)]
    pub assume_role_external_id: Option<String>,
    #[serde(default, alias = "assumeRoleDurationSeconds")]
    pub assume_role_session_duration_seconds: Option<u32>,
    /// Override base URL for every service call
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

impl CollectorConfig {
    /// Load configuration from a JSON or YAML file (by extension)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config {:?}", path))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {:?}", path))
        }
    }

    /// Check required fields for the selected mode and build the snapshot
    pub fn validate(self) -> Result<Settings, CollectorError> {
        let batch_size = match self.batch_size {
            None => DEFAULT_BATCH_SIZE,
            Some(0) => return Err(CollectorError::configuration("batchSize must be positive")),
            Some(size) => size,
        };

        let static_access_key = non_empty(self.static_access_key);
        let static_secret_key = non_empty(self.static_secret_key);

        let authentication = match self.authentication_mode {
            AuthenticationMode::Auto => {
                if static_access_key.is_some() || static_secret_key.is_some() {
                    tracing::warn!("Static keys are ignored when authenticationMode is auto");
                }
                Authentication::Auto
            }
            AuthenticationMode::Explicit => match (static_access_key, static_secret_key) {
                (Some(access_key_id), Some(secret_access_key)) => {
                    Authentication::Explicit(StaticKeys {
                        access_key_id,
                        secret_access_key,
                    })
                }
                _ => {
                    return Err(CollectorError::configuration(
                        "staticAccessKey and staticSecretKey are required when authenticationMode is explicit",
                    ))
                }
            },
        };

        let assume_role = if self.assume_role_enabled {
            let role_arn = non_empty(self.assume_role_arn).ok_or_else(|| {
                CollectorError::configuration(
                    "assumeRoleArn is required when assumeRoleEnabled is true",
                )
            })?;

            let session_duration_seconds = self
                .assume_role_session_duration_seconds
                .unwrap_or(DEFAULT_SESSION_DURATION_SECONDS);
            if !SESSION_DURATION_RANGE.contains(&session_duration_seconds) {
                tracing::warn!(
                    "assumeRoleSessionDurationSeconds={} is outside the STS range {}..={}",
                    session_duration_seconds,
                    SESSION_DURATION_RANGE.start(),
                    SESSION_DURATION_RANGE.end()
                );
            }
            if session_duration_seconds != crate::aws::sts::ASSUME_ROLE_DURATION_SECONDS {
                tracing::warn!(
                    "assumeRoleSessionDurationSeconds={} is not forwarded; sessions are requested for {} seconds",
                    session_duration_seconds,
                    crate::aws::sts::ASSUME_ROLE_DURATION_SECONDS
                );
            }

            Some(AssumeRoleSettings {
                role_arn,
                external_id: non_empty(self.assume_role_external_id),
                session_duration_seconds,
            })
        } else {
            None
        };

        if self.regions.is_empty() || self.endpoints.is_empty() {
            tracing::warn!(
                "Configuration has {} region(s) and {} endpoint(s); no jobs will be produced",
                self.regions.len(),
                self.endpoints.len()
            );
        }

        Ok(Settings {
            regions: self.regions,
            endpoints: self.endpoints,
            batch_size,
            authentication,
            assume_role,
            endpoint_url: non_empty(self.endpoint_url),
            request_timeout: self
                .request_timeout_seconds
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validated, immutable configuration snapshot
#[derive(Debug, Clone)]
pub struct Settings {
    pub regions: Vec<String>,
    pub endpoints: Vec<String>,
    pub batch_size: u32,
    pub authentication: Authentication,
    pub assume_role: Option<AssumeRoleSettings>,
    pub endpoint_url: Option<String>,
    pub request_timeout: Option<Duration>,
}

/// Base identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Auto,
    Explicit(StaticKeys),
}

/// Static access key pair
#[derive(Clone, PartialEq, Eq)]
pub struct StaticKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl StaticKeys {
    pub fn new(access_key_id: &str, secret_access_key: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        }
    }

    pub fn to_credentials(&self) -> Credentials {
        Credentials::new(&self.access_key_id, &self.secret_access_key)
    }
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeys")
            .field(
                "access_key_id",
                &crate::aws::auth::mask_credential(&self.access_key_id),
            )
            .field("secret_access_key", &"***")
            .finish()
    }
}

/// Role assumption parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleSettings {
    pub role_arn: String,
    pub external_id: Option<String>,
    /// Validated and reported, but not sent to STS
    pub session_duration_seconds: u32,
}

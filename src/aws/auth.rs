//! AWS Authentication
//!
//! Resolves the credential bundle for one execution: static keys, the
//! ambient provider chain, or temporary credentials from an assume-role
//! exchange. Nothing resolved here is cached beyond the execution that
//! asked for it.

use super::sts::{AssumeRoleRequest, TokenExchange};
use crate::config::{Authentication, Settings};
use crate::error::CollectorError;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// IMDSv2 metadata endpoint
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
/// IMDSv2 token TTL in seconds (6 hours)
const IMDS_TOKEN_TTL: u64 = 21600;
/// Fast fail when not running on EC2
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

/// Credential bundle used to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key_id: &str, secret_access_key: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: None,
            expires_at: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &mask_credential(&self.access_key_id))
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Mask sensitive credential values for logging
pub fn mask_credential(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Resolve the credential bundle for one execution in `region`.
///
/// `Ok(None)` is the empty bundle: the service client falls back to the
/// ambient chain. With assume-role enabled the exchange runs exactly once
/// per call; its source identity is the static keys in explicit mode and the
/// ambient chain otherwise.
pub async fn resolve_credentials(
    settings: &Settings,
    region: &str,
    exchange: &dyn TokenExchange,
) -> Result<Option<Credentials>, CollectorError> {
    let static_credentials = match &settings.authentication {
        Authentication::Auto => None,
        Authentication::Explicit(keys) => Some(keys.to_credentials()),
    };

    let Some(role) = &settings.assume_role else {
        return Ok(static_credentials);
    };

    let request = AssumeRoleRequest::for_role(role);
    debug!(
        "Assuming role {} in {} (session {})",
        request.role_arn, region, request.session_name
    );

    let credentials = exchange
        .assume_role(region, static_credentials, &request)
        .await
        .map_err(CollectorError::Authentication)?;

    debug!(
        "Assumed role, access_key: {}, expires_at: {:?}",
        mask_credential(&credentials.access_key_id),
        credentials.expires_at
    );

    Ok(Some(credentials))
}

// =============================================================================
// Ambient credential chain
// =============================================================================

/// Load credentials from the ambient chain: environment, shared credentials
/// file, then EC2 instance metadata.
pub async fn load_ambient_credentials(http: &Client) -> Result<Credentials> {
    if let Some(creds) = load_from_env() {
        debug!("Loaded credentials from environment variables");
        return Ok(creds);
    }

    let profile = profile_name();
    match credentials_file_path() {
        Some(path) => match load_from_credentials_file(&path, &profile) {
            Ok(creds) => {
                debug!("Loaded credentials for profile '{}' from {:?}", profile, path);
                return Ok(creds);
            }
            Err(e) => debug!("Shared credentials file unusable: {}", e),
        },
        None => debug!("No home directory, skipping shared credentials file"),
    }

    if imds_disabled() {
        return Err(anyhow!(
            "No credentials found: set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY or configure profile '{}'",
            profile
        ));
    }

    fetch_imds_credentials(http).await.map_err(|e| {
        anyhow!(
            "No credentials found in environment, profile '{}' or instance metadata: {:#}",
            profile,
            e
        )
    })
}

/// Load credentials from environment variables
fn load_from_env() -> Option<Credentials> {
    credentials_from_vars(|name| env::var(name).ok())
}

/// Static credentials from `AWS_*` variables; blank values count as unset
fn credentials_from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
    let var = |name: &str| var(name).filter(|v| !v.is_empty());

    Some(Credentials {
        access_key_id: var("AWS_ACCESS_KEY_ID")?,
        secret_access_key: var("AWS_SECRET_ACCESS_KEY")?,
        session_token: var("AWS_SESSION_TOKEN"),
        expires_at: None,
    })
}

fn profile_name() -> String {
    profile_from_vars(|name| env::var(name).ok())
}

fn profile_from_vars(var: impl Fn(&str) -> Option<String>) -> String {
    var("AWS_PROFILE")
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

fn imds_disabled() -> bool {
    env::var("AWS_EC2_METADATA_DISABLED")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// ~/.aws/credentials or AWS_SHARED_CREDENTIALS_FILE
fn credentials_file_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|h| h.join(".aws").join("credentials"))
}

/// Parse an INI-style file into sections
fn parse_ini_file(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current_section = String::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current_section = line[1..line.len() - 1].trim().to_string();
            sections.entry(current_section.clone()).or_default();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            if !current_section.is_empty() {
                sections
                    .entry(current_section.clone())
                    .or_default()
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    sections
}

fn load_from_credentials_file(path: &Path, profile: &str) -> Result<Credentials> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Could not read {:?}", path))?;
    let sections = parse_ini_file(&content);

    let section = sections
        .get(profile)
        .ok_or_else(|| anyhow!("Profile '{}' not found in credentials file", profile))?;

    let access_key_id = section
        .get("aws_access_key_id")
        .ok_or_else(|| anyhow!("aws_access_key_id not found for profile '{}'", profile))?
        .clone();

    let secret_access_key = section
        .get("aws_secret_access_key")
        .ok_or_else(|| anyhow!("aws_secret_access_key not found for profile '{}'", profile))?
        .clone();

    Ok(Credentials {
        access_key_id,
        secret_access_key,
        session_token: section.get("aws_session_token").cloned(),
        expires_at: None,
    })
}

/// Fetch role credentials from IMDSv2
async fn fetch_imds_credentials(http: &Client) -> Result<Credentials> {
    let endpoint = env::var("AWS_EC2_METADATA_SERVICE_ENDPOINT")
        .unwrap_or_else(|_| IMDS_ENDPOINT.to_string());
    let endpoint = endpoint.trim_end_matches('/');

    trace!("Fetching IMDSv2 session token");
    let token_response = http
        .put(format!("{}/latest/api/token", endpoint))
        .header("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL.to_string())
        .timeout(IMDS_TIMEOUT)
        .send()
        .await
        .context("Failed to get IMDS token (not running on EC2?)")?;

    if !token_response.status().is_success() {
        return Err(anyhow!(
            "IMDS token request failed with status: {}",
            token_response.status()
        ));
    }
    let token = token_response.text().await.context("Failed to read IMDS token")?;

    let roles_url = format!("{}/latest/meta-data/iam/security-credentials/", endpoint);
    let role_response = http
        .get(&roles_url)
        .header("X-aws-ec2-metadata-token", &token)
        .timeout(IMDS_TIMEOUT)
        .send()
        .await
        .context("Failed to get IAM role")?;

    if !role_response.status().is_success() {
        return Err(anyhow!(
            "No IAM role attached to this instance (status: {})",
            role_response.status()
        ));
    }

    let role_text = role_response.text().await.context("Failed to read IAM role name")?;
    let role_name = role_text
        .lines()
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("No IAM role attached to this instance"))?
        .to_string();

    debug!("Found instance role: {}", role_name);

    let creds_json: Value = http
        .get(format!("{}{}", roles_url, role_name))
        .header("X-aws-ec2-metadata-token", &token)
        .timeout(IMDS_TIMEOUT)
        .send()
        .await
        .context("Failed to get instance role credentials")?
        .error_for_status()
        .context("Instance role credentials request rejected")?
        .json()
        .await
        .context("Failed to parse instance role credentials")?;

    credentials_from_document(&creds_json, "Token")
}

/// Build credentials from a JSON document shaped like the IMDS / STS
/// `Credentials` object. `token_field` differs between the two sources.
pub(crate) fn credentials_from_document(doc: &Value, token_field: &str) -> Result<Credentials> {
    let field = |name: &str| doc.get(name).and_then(Value::as_str).map(str::to_string);

    let access_key_id = field("AccessKeyId").ok_or_else(|| anyhow!("AccessKeyId not found"))?;
    let secret_access_key =
        field("SecretAccessKey").ok_or_else(|| anyhow!("SecretAccessKey not found"))?;

    Ok(Credentials {
        access_key_id,
        secret_access_key,
        session_token: field(token_field),
        expires_at: field("Expiration").and_then(|s| s.parse::<DateTime<Utc>>().ok()),
    })
}

//! Signed HTTP client for AWS REST APIs
//!
//! Knows per-service endpoints, SigV4 signing names, API versions and the
//! three wire protocols the collected services speak. Responses are decoded
//! into `serde_json::Value`; XML documents are converted and unwrapped from
//! their `<ActionResponse>/<ActionResult>` envelope.

use super::auth::{load_ambient_credentials, mask_credential, Credentials};
use anyhow::{anyhow, Context, Result};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4::SigningParams;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::SystemTime;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

/// AWS partition a region belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Partition {
    Aws,
    China,
    GovCloud,
}

impl Partition {
    fn of(region: &str) -> Self {
        if region.starts_with("cn-") {
            Self::China
        } else if region.starts_with("us-gov-") {
            Self::GovCloud
        } else {
            Self::Aws
        }
    }

    fn domain(self) -> &'static str {
        match self {
            Self::China => "amazonaws.com.cn",
            Self::Aws | Self::GovCloud => "amazonaws.com",
        }
    }

    /// Region global services are signed for
    fn global_region(self) -> &'static str {
        match self {
            Self::Aws => "us-east-1",
            Self::China => "cn-north-1",
            Self::GovCloud => "us-gov-west-1",
        }
    }

    /// Host of a global service inside this partition
    fn global_host(self, endpoint_prefix: &str) -> String {
        match self {
            Self::Aws => format!("{}.{}", endpoint_prefix, self.domain()),
            Self::China => format!("{}.{}.{}", endpoint_prefix, self.global_region(), self.domain()),
            Self::GovCloud => format!("{}.us-gov.{}", endpoint_prefix, self.domain()),
        }
    }
}

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Service families reachable through the endpoint registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceFamily {
    Ec2,
    Elb,
    Elbv2,
    Iam,
    Lambda,
    Rds,
    Cloudfront,
    S3,
    Sts,
}

impl ServiceFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ec2 => "ec2",
            Self::Elb => "elb",
            Self::Elbv2 => "elbv2",
            Self::Iam => "iam",
            Self::Lambda => "lambda",
            Self::Rds => "rds",
            Self::Cloudfront => "cloudfront",
            Self::S3 => "s3",
            Self::Sts => "sts",
        }
    }

    /// Wire-level definition of the service
    pub fn definition(self) -> ServiceDefinition {
        match self {
            Self::Ec2 => ServiceDefinition {
                signing_name: "ec2",
                endpoint_prefix: "ec2",
                api_version: "2016-11-15",
                protocol: Protocol::Query,
                is_global: false,
            },
            Self::Elb => ServiceDefinition {
                signing_name: "elasticloadbalancing",
                endpoint_prefix: "elasticloadbalancing",
                api_version: "2012-06-01",
                protocol: Protocol::Query,
                is_global: false,
            },
            Self::Elbv2 => ServiceDefinition {
                signing_name: "elasticloadbalancing",
                endpoint_prefix: "elasticloadbalancing",
                api_version: "2015-12-01",
                protocol: Protocol::Query,
                is_global: false,
            },
            Self::Iam => ServiceDefinition {
                signing_name: "iam",
                endpoint_prefix: "iam",
                api_version: "2010-05-08",
                protocol: Protocol::Query,
                is_global: true,
            },
            Self::Lambda => ServiceDefinition {
                signing_name: "lambda",
                endpoint_prefix: "lambda",
                api_version: "2015-03-31",
                protocol: Protocol::RestJson,
                is_global: false,
            },
            Self::Rds => ServiceDefinition {
                signing_name: "rds",
                endpoint_prefix: "rds",
                api_version: "2014-10-31",
                protocol: Protocol::Query,
                is_global: false,
            },
            Self::Cloudfront => ServiceDefinition {
                signing_name: "cloudfront",
                endpoint_prefix: "cloudfront",
                api_version: "2020-05-31",
                protocol: Protocol::RestXml,
                is_global: true,
            },
            Self::S3 => ServiceDefinition {
                signing_name: "s3",
                endpoint_prefix: "s3",
                api_version: "2006-03-01",
                protocol: Protocol::RestXml,
                is_global: false,
            },
            Self::Sts => ServiceDefinition {
                signing_name: "sts",
                endpoint_prefix: "sts",
                api_version: "2011-06-15",
                protocol: Protocol::Query,
                is_global: false,
            },
        }
    }
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AWS service definition
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    /// Service signing name (e.g., "ec2", "elasticloadbalancing")
    pub signing_name: &'static str,
    /// Endpoint host prefix
    pub endpoint_prefix: &'static str,
    pub api_version: &'static str,
    pub protocol: Protocol,
    /// Global services are signed for us-east-1 and have a single endpoint
    pub is_global: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// EC2/IAM style: Action=X&Version=Y form parameters
    Query,
    /// REST with JSON body (Lambda)
    RestJson,
    /// REST with XML body (S3, CloudFront)
    RestXml,
}

/// One operation invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub service: ServiceFamily,
    pub action: String,
    /// Request path for REST protocols; query protocol always posts to `/`
    pub http_path: Option<String>,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(service: ServiceFamily, action: &str) -> Self {
        Self {
            service,
            action: action.to_string(),
            http_path: None,
            params: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: Option<&str>) -> Self {
        self.http_path = path.map(str::to_string);
        self
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Encode parameters as an `application/x-www-form-urlencoded` string
fn encode_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// AWS HTTP client scoped to one region and one credential bundle
pub struct AwsHttpClient {
    http_client: Client,
    region: String,
    credentials: Option<Credentials>,
    /// Ambient credentials, resolved on first use when no bundle was given
    ambient: OnceCell<Credentials>,
    endpoint_url: Option<String>,
}

impl AwsHttpClient {
    /// Create a new client. `credentials: None` defers to the ambient chain.
    pub fn new(
        http_client: Client,
        region: &str,
        credentials: Option<Credentials>,
        endpoint_url: Option<String>,
    ) -> Self {
        debug!(
            "Creating AWS HTTP client for region: {}, access_key: {}, endpoint_url: {:?}",
            region,
            credentials
                .as_ref()
                .map(|c| mask_credential(&c.access_key_id))
                .unwrap_or_else(|| "<ambient>".to_string()),
            endpoint_url
        );
        Self {
            http_client,
            region: region.to_string(),
            credentials,
            ambient: OnceCell::new(),
            endpoint_url,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn credentials(&self) -> Result<&Credentials> {
        if let Some(credentials) = &self.credentials {
            return Ok(credentials);
        }
        self.ambient
            .get_or_try_init(|| load_ambient_credentials(&self.http_client))
            .await
    }

    /// Region a request to `service` is signed for
    fn signing_region<'a>(&'a self, service: &ServiceDefinition) -> &'a str {
        if service.is_global {
            Partition::of(&self.region).global_region()
        } else {
            &self.region
        }
    }

    /// Base URL for a service
    fn endpoint(&self, service: &ServiceDefinition) -> String {
        // A custom endpoint serves ALL services (LocalStack, test servers)
        if let Some(endpoint) = &self.endpoint_url {
            return endpoint.trim_end_matches('/').to_string();
        }

        let partition = Partition::of(&self.region);
        if service.is_global {
            return format!("https://{}", partition.global_host(service.endpoint_prefix));
        }

        format!(
            "https://{}.{}.{}",
            service.endpoint_prefix,
            self.region,
            partition.domain()
        )
    }

    /// Send one request and decode its response
    pub async fn send(&self, request: &ApiRequest) -> Result<Value> {
        let service = request.service.definition();
        let base = self.endpoint(&service);

        debug!(
            "{} request: service={}, action={}, region={}",
            match service.protocol {
                Protocol::Query => "Query",
                Protocol::RestJson => "REST-JSON",
                Protocol::RestXml => "REST-XML",
            },
            request.service,
            request.action,
            self.region
        );
        trace!("Request params: {:?}", request.params);

        let response = match service.protocol {
            Protocol::Query => {
                let mut params = vec![
                    ("Action".to_string(), request.action.clone()),
                    ("Version".to_string(), service.api_version.to_string()),
                ];
                params.extend(request.params.iter().cloned());
                let body = encode_params(&params);
                let headers = [(
                    "content-type",
                    "application/x-www-form-urlencoded; charset=utf-8",
                )];
                self.signed_request(&service, "POST", &format!("{}/", base), &body, &headers)
                    .await?
            }
            Protocol::RestJson | Protocol::RestXml => {
                let path = request.http_path.as_deref().unwrap_or("/");
                let url = if request.params.is_empty() {
                    format!("{}{}", base, path)
                } else {
                    format!("{}{}?{}", base, path, encode_params(&request.params))
                };
                self.signed_request(&service, "GET", &url, "", &[]).await?
            }
        };

        decode_response(service.protocol, &request.action, &response)
            .with_context(|| format!("Failed to decode {} response", request.action))
    }

    /// Make a SigV4-signed request, returning the body on success
    async fn signed_request(
        &self,
        service: &ServiceDefinition,
        method: &str,
        url: &str,
        body: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<String> {
        let credentials = self.credentials().await?;
        let region = self.signing_region(service);

        let parsed_url = url::Url::parse(url).with_context(|| format!("Invalid URL {}", url))?;
        let host = match (parsed_url.host_str(), parsed_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(anyhow!("Invalid URL {}", url)),
        };
        let path_and_query = match parsed_url.query() {
            Some(query) => format!("{}?{}", parsed_url.path(), query),
            None => parsed_url.path().to_string(),
        };

        let mut headers = vec![("host".to_string(), host)];
        for (k, v) in extra_headers {
            headers.push((k.to_lowercase(), v.to_string()));
        }

        // S3 requires the payload hash header even for empty GETs
        let is_s3 = service.signing_name == "s3";
        if is_s3 {
            headers.push((
                "x-amz-content-sha256".to_string(),
                "UNSIGNED-PAYLOAD".to_string(),
            ));
        }

        let creds = aws_credential_types::Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            credentials.session_token.clone(),
            None,
            "aws-descriptions",
        );
        let identity: Identity = creds.into();

        let signing_params = SigningParams::builder()
            .identity(&identity)
            .region(region)
            .name(service.signing_name)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()?
            .into();

        let signable_body = if is_s3 {
            SignableBody::UnsignedPayload
        } else {
            SignableBody::Bytes(body.as_bytes())
        };

        let signable_request = SignableRequest::new(
            method,
            &path_and_query,
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            signable_body,
        )?;

        let (signing_instructions, _signature) =
            sign(signable_request, &signing_params)?.into_parts();

        let mut request = match method {
            "GET" => self.http_client.get(url),
            "POST" => self.http_client.post(url),
            _ => return Err(anyhow!("Unsupported HTTP method: {}", method)),
        };

        for (name, value) in signing_instructions.headers() {
            request = request.header(name.to_string(), value.to_string());
        }
        for (name, value) in headers.iter().skip(1) {
            request = request.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            request = request.body(body.to_string());
        }

        trace!("Sending {} request to {}", method, url);
        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read response body")?;

        debug!("Response status: {}", status);

        if !status.is_success() {
            warn!("AWS request failed: {} - {}", status, sanitize_for_log(&text));
            return Err(anyhow!(
                "AWS request failed ({}): {}",
                status,
                describe_error_body(&text)
            ));
        }

        Ok(text)
    }
}

/// Turn a raw response body into a record
pub(crate) fn decode_response(protocol: Protocol, action: &str, body: &str) -> Result<Value> {
    match protocol {
        Protocol::RestJson => {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(body).context("Failed to parse response JSON")
        }
        Protocol::Query | Protocol::RestXml => Ok(unwrap_envelope(xml_to_json(body)?, action)),
    }
}

/// Strip the single root element and, for query APIs, the `<ActionResult>` wrapper
fn unwrap_envelope(document: Value, action: &str) -> Value {
    let mut inner = match document {
        Value::Object(root) if root.len() == 1 => match root.into_iter().next() {
            Some((_, value)) => value,
            None => return Value::Null,
        },
        other => return other,
    };

    let result_key = format!("{}Result", action);
    match inner.get_mut(&result_key) {
        Some(result) => result.take(),
        None => inner,
    }
}

/// Extract `Code: Message` from an AWS error body (XML or JSON)
pub fn describe_error_body(body: &str) -> String {
    let extract = |tag: &str| -> Option<&str> {
        let start_tag = format!("<{}>", tag);
        let end_tag = format!("</{}>", tag);
        let start = body.find(&start_tag)? + start_tag.len();
        let end = body[start..].find(&end_tag)? + start;
        Some(&body[start..end])
    };

    if let (Some(code), Some(message)) = (extract("Code"), extract("Message")) {
        return format!("{}: {}", code, message);
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let code = map
            .get("__type")
            .or_else(|| map.get("Type"))
            .and_then(Value::as_str);
        let message = map
            .get("message")
            .or_else(|| map.get("Message"))
            .and_then(Value::as_str);
        match (code, message) {
            (Some(code), Some(message)) => return format!("{}: {}", code, message),
            (None, Some(message)) => return message.to_string(),
            _ => {}
        }
    }

    sanitize_for_log(body)
}

/// Element names that are always list entries in the collected services'
/// XML responses (EC2 `item`, query-API `member`, and the S3, CloudFront and
/// RDS per-type item tags).
pub const LIST_ITEM_TAGS: &[&str] = &[
    "item",
    "member",
    "Bucket",
    "DistributionSummary",
    "Origin",
    "OriginGroup",
    "CNAME",
    "CacheBehavior",
    "LambdaFunctionAssociation",
    "FunctionAssociation",
    "DBInstance",
    "ReservedDBInstance",
    "RecurringCharge",
    "VpcSecurityGroupMembership",
    "DBSecurityGroup",
    "DBParameterGroup",
    "DBParameterGroupStatus",
    "OptionGroupMembership",
    "Subnet",
];

/// Parse XML response to JSON using quick-xml
///
/// Repeated sibling elements and [`LIST_ITEM_TAGS`] become arrays (a single
/// entry is still a one-element array); leaf elements become strings.
pub fn xml_to_json(xml: &str) -> Result<Value> {
    use quick_xml::events::Event;
    use quick_xml::Reader;
    use serde_json::Map;

    fn insert_child(map: &mut Map<String, Value>, tag_name: String, child_value: Value) {
        if LIST_ITEM_TAGS.contains(&tag_name.as_str()) {
            match map
                .entry(tag_name)
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(arr) => arr.push(child_value),
                other => {
                    let old = other.take();
                    *other = Value::Array(vec![old, child_value]);
                }
            }
            return;
        }

        if let Some(existing) = map.get_mut(&tag_name) {
            match existing {
                Value::Array(arr) => arr.push(child_value),
                _ => {
                    let old = existing.take();
                    *existing = Value::Array(vec![old, child_value]);
                }
            }
        } else {
            map.insert(tag_name, child_value);
        }
    }

    fn parse_element(reader: &mut Reader<&[u8]>) -> Result<Value> {
        let mut map: Map<String, Value> = Map::new();
        let mut buf = Vec::new();
        let mut current_text = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let child_value = parse_element(reader)?;
                    insert_child(&mut map, tag_name, child_value);
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().unwrap_or_default().trim().to_string();
                    if !text.is_empty() {
                        current_text = text;
                    }
                }
                Ok(Event::CData(e)) => {
                    current_text = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                }
                Ok(Event::End(_)) => break,
                Ok(Event::Empty(e)) => {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    insert_child(&mut map, tag_name, Value::Null);
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(anyhow!("XML parse error: {}", e)),
                _ => {}
            }
            buf.clear();
        }

        if map.is_empty() {
            Ok(Value::String(current_text))
        } else {
            Ok(Value::Object(map))
        }
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root_map: Map<String, Value> = Map::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let child_value = parse_element(&mut reader)?;
                root_map.insert(tag_name, child_value);
            }
            Ok(Event::Empty(e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                root_map.insert(tag_name, Value::Null);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(anyhow!("XML parse error: {}", e)),
        }
        buf.clear();
    }

    Ok(Value::Object(root_map))
}

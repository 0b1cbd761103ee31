//! Resource Fetcher
//!
//! Executes one endpoint against a scoped service client. Both execution
//! modes produce the same shape: a lazy stream of records that fetches the
//! next page only when polled and cannot be replayed.

use super::registry::{EndpointDef, PaginatorDef};
use crate::aws::client::ServiceApi;
use crate::error::CollectorError;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lazy sequence of result records (one page or one whole response each)
pub type RecordStream = BoxStream<'static, Result<Value, CollectorError>>;

/// Pagination state between polls
enum Cursor {
    First,
    Next(String),
    Exhausted,
}

/// Run `endpoint` through `client` with the mode-appropriate strategy
pub fn execute(
    endpoint: &'static EndpointDef,
    client: Arc<dyn ServiceApi>,
    region: &str,
    batch_size: u32,
) -> RecordStream {
    match &endpoint.paginator {
        Some(paginator) => paginate(endpoint, paginator, client, region.to_string(), batch_size.max(1)),
        None => single(endpoint, client, region.to_string()),
    }
}

/// One request per page until the provider stops returning a token
fn paginate(
    endpoint: &'static EndpointDef,
    paginator: &'static PaginatorDef,
    client: Arc<dyn ServiceApi>,
    region: String,
    page_size: u32,
) -> RecordStream {
    stream::try_unfold(Cursor::First, move |cursor| {
        let client = Arc::clone(&client);
        let region = region.clone();
        async move {
            let token = match cursor {
                Cursor::First => None,
                Cursor::Next(token) => Some(token),
                Cursor::Exhausted => return Ok(None),
            };

            let mut params = vec![(paginator.page_size.clone(), page_size.to_string())];
            if let Some(token) = &token {
                params.push((paginator.input_token.clone(), token.clone()));
            }

            debug!(
                "Fetching page of {} in {} (continued: {})",
                endpoint.name,
                region,
                token.is_some()
            );

            let page = client
                .call(endpoint.request(params))
                .await
                .map_err(|source| upstream_error(endpoint, &region, source))?;

            let next = next_token(&page, &paginator.output_token);
            let cursor = match next {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    warn!("{} returned the same token twice, stopping", endpoint.name);
                    Cursor::Exhausted
                }
                Some(next) => Cursor::Next(next),
                None => Cursor::Exhausted,
            };

            Ok(Some((page, cursor)))
        }
    })
    .boxed()
}

/// Exactly one request, issued on first poll
fn single(endpoint: &'static EndpointDef, client: Arc<dyn ServiceApi>, region: String) -> RecordStream {
    stream::once(async move {
        debug!("Fetching {} in {}", endpoint.name, region);
        client
            .call(endpoint.request(Vec::new()))
            .await
            .map_err(|source| upstream_error(endpoint, &region, source))
    })
    .boxed()
}

fn upstream_error(endpoint: &EndpointDef, region: &str, source: anyhow::Error) -> CollectorError {
    CollectorError::Upstream {
        endpoint: endpoint.name.clone(),
        region: region.to_string(),
        source,
    }
}

/// Read the continuation token at a dot-separated `path`; empty means done
fn next_token(page: &Value, path: &str) -> Option<String> {
    let mut current = page;
    for part in path.split('.') {
        current = current.get(part)?;
    }

    match current {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::get_endpoint;
    use crate::test_helpers::MockProvider;
    use crate::aws::client::ClientFactory;
    use futures::TryStreamExt;
    use serde_json::json;

    fn endpoint(name: &str) -> &'static EndpointDef {
        get_endpoint(name).expect("registered endpoint")
    }

    #[tokio::test]
    async fn test_paginated_emits_one_record_per_page_in_order() {
        let provider = MockProvider::default();
        provider
            .respond("DescribeVpcs", json!({"vpcSet": {"item": {"vpcId": "vpc-1"}}, "nextToken": "t1"}))
            .respond("DescribeVpcs", json!({"vpcSet": {"item": {"vpcId": "vpc-2"}}, "nextToken": "t2"}))
            .respond("DescribeVpcs", json!({"vpcSet": {"item": {"vpcId": "vpc-3"}}}));
        let client = provider.client("us-east-1", None);

        let records: Vec<Value> = execute(endpoint("ec2_describeVpcs"), client, "us-east-1", 50)
            .try_collect()
            .await
            .expect("all pages succeed");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["vpcSet"]["item"]["vpcId"], "vpc-1");
        assert_eq!(records[2]["vpcSet"]["item"]["vpcId"], "vpc-3");

        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].request.param("MaxResults"), Some("50"));
        assert_eq!(calls[0].request.param("NextToken"), None);
        assert_eq!(calls[1].request.param("NextToken"), Some("t1"));
        assert_eq!(calls[2].request.param("NextToken"), Some("t2"));
    }

    #[tokio::test]
    async fn test_page_size_has_minimum_of_one() {
        let provider = MockProvider::default();
        provider.respond("ListRoles", json!({"Roles": []}));
        let client = provider.client("us-east-1", None);

        let records: Vec<Value> = execute(endpoint("iam_listRoles"), client, "us-east-1", 0)
            .try_collect()
            .await
            .expect("page succeeds");

        assert_eq!(records.len(), 1);
        assert_eq!(provider.calls()[0].request.param("MaxItems"), Some("1"));
    }

    #[tokio::test]
    async fn test_single_emits_exactly_one_record_without_page_size() {
        let provider = MockProvider::default();
        provider.respond("ListBuckets", json!({"Buckets": {"Bucket": [{"Name": "a"}, {"Name": "b"}]}}));
        let client = provider.client("us-east-1", None);

        let records: Vec<Value> = execute(endpoint("s3_listBuckets"), client, "us-east-1", 500)
            .try_collect()
            .await
            .expect("request succeeds");

        assert_eq!(records.len(), 1);
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].request.params.is_empty());
        assert_eq!(calls[0].request.http_path.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn test_nothing_is_fetched_until_polled() {
        let provider = MockProvider::default();
        provider.respond("DescribeRegions", json!({"regionInfo": {}}));
        let client = provider.client("us-east-1", None);

        let mut stream = execute(endpoint("ec2_describeRegions"), client, "us-east-1", 100);
        assert!(provider.calls().is_empty());

        let first = stream.next().await.expect("one record").expect("success");
        assert_eq!(first, json!({"regionInfo": {}}));
        assert_eq!(provider.calls().len(), 1);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_earlier_records_then_terminates() {
        let provider = MockProvider::default();
        provider
            .respond("ListUsers", json!({"Users": {"member": {"UserName": "a"}}, "IsTruncated": "true", "Marker": "m1"}))
            .fail("ListUsers", "Throttling: Rate exceeded");
        let client = provider.client("us-east-1", None);

        let results: Vec<Result<Value, CollectorError>> =
            execute(endpoint("iam_listUsers"), client, "us-east-1", 100)
                .collect()
                .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(CollectorError::Upstream { endpoint, region, source }) => {
                assert_eq!(endpoint, "iam_listUsers");
                assert_eq!(region, "us-east-1");
                assert!(source.to_string().contains("Throttling"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_token_stops_pagination() {
        let provider = MockProvider::default();
        provider
            .respond("DescribeDBInstances", json!({"Marker": "same"}))
            .respond("DescribeDBInstances", json!({"Marker": "same"}));
        let client = provider.client("eu-central-1", None);

        let records: Vec<Value> = execute(endpoint("rds_describeDbInstances"), client, "eu-central-1", 20)
            .try_collect()
            .await
            .expect("pages succeed");

        assert_eq!(records.len(), 2);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_single_failure_is_upstream_error() {
        let provider = MockProvider::default();
        provider.fail("DescribeKeyPairs", "UnauthorizedOperation: denied");
        let client = provider.client("us-east-1", None);

        let results: Vec<_> = execute(endpoint("ec2_describeKeyPairs"), client, "us-east-1", 100)
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(CollectorError::Upstream { .. })));
    }

    #[test]
    fn test_next_token_variants() {
        assert_eq!(next_token(&json!({"NextMarker": "abc"}), "NextMarker"), Some("abc".to_string()));
        assert_eq!(next_token(&json!({"NextMarker": ""}), "NextMarker"), None);
        assert_eq!(next_token(&json!({"NextMarker": null}), "NextMarker"), None);
        assert_eq!(next_token(&json!({}), "NextMarker"), None);
        assert_eq!(
            next_token(&json!({"Page": {"Cursor": "d2"}}), "Page.Cursor"),
            Some("d2".to_string())
        );
    }

    fn ec2_page(operation: &str, set: &str) -> String {
        format!(
            r#"<{op}Response xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
                <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
                <{set}><item><id>x</id></item></{set}>
                <nextToken>tok-2</nextToken>
            </{op}Response>"#,
            op = operation,
            set = set
        )
    }

    fn query_page(operation: &str, list: &str, token_element: &str) -> String {
        format!(
            r#"<{op}Response xmlns="https://example.amazonaws.com/doc/">
                <{op}Result>
                    <{list}><member><Name>x</Name></member></{list}>
                    <IsTruncated>true</IsTruncated>
                    <{token}>tok-2</{token}>
                </{op}Result>
                <ResponseMetadata><RequestId>7a62c49f-347e-4fc4-9331-6e8eEXAMPLE</RequestId></ResponseMetadata>
            </{op}Response>"#,
            op = operation,
            list = list,
            token = token_element
        )
    }

    /// Representative first page of every paginated endpoint, as returned on the wire
    fn wire_page(name: &str) -> String {
        match name {
            "ec2_describeImages" => ec2_page("DescribeImages", "imagesSet"),
            "ec2_describeInstances" => ec2_page("DescribeInstances", "reservationSet"),
            "ec2_describeNetworkAcls" => ec2_page("DescribeNetworkAcls", "networkAclSet"),
            "ec2_describeSecurityGroups" => ec2_page("DescribeSecurityGroups", "securityGroupInfo"),
            "ec2_describeSnapshots" => ec2_page("DescribeSnapshots", "snapshotSet"),
            "ec2_describeSubnets" => ec2_page("DescribeSubnets", "subnetSet"),
            "ec2_describeVolumes" => ec2_page("DescribeVolumes", "volumeSet"),
            "ec2_describeVpcs" => ec2_page("DescribeVpcs", "vpcSet"),
            "elb_describeLoadBalancers" => {
                query_page("DescribeLoadBalancers", "LoadBalancerDescriptions", "NextMarker")
            }
            "elbv2_describeListeners" => query_page("DescribeListeners", "Listeners", "NextMarker"),
            "elbv2_describeLoadBalancers" => {
                query_page("DescribeLoadBalancers", "LoadBalancers", "NextMarker")
            }
            "elbv2_describeTargetGroups" => {
                query_page("DescribeTargetGroups", "TargetGroups", "NextMarker")
            }
            "iam_listAttachedUserPolicies" => {
                query_page("ListAttachedUserPolicies", "AttachedPolicies", "Marker")
            }
            "iam_listGroups" => query_page("ListGroups", "Groups", "Marker"),
            "iam_listPolicies" => query_page("ListPolicies", "Policies", "Marker"),
            "iam_listRoles" => query_page("ListRoles", "Roles", "Marker"),
            "iam_listUsers" => query_page("ListUsers", "Users", "Marker"),
            "rds_describeDbInstances" => r#"<DescribeDBInstancesResponse xmlns="http://rds.amazonaws.com/doc/2014-10-31/">
                <DescribeDBInstancesResult>
                    <DBInstances><DBInstance><DBInstanceIdentifier>db1</DBInstanceIdentifier></DBInstance></DBInstances>
                    <Marker>tok-2</Marker>
                </DescribeDBInstancesResult>
                <ResponseMetadata><RequestId>r</RequestId></ResponseMetadata>
            </DescribeDBInstancesResponse>"#
                .to_string(),
            "rds_describeReservedDbInstances" => r#"<DescribeReservedDBInstancesResponse xmlns="http://rds.amazonaws.com/doc/2014-10-31/">
                <DescribeReservedDBInstancesResult>
                    <ReservedDBInstances><ReservedDBInstance><ReservedDBInstanceId>ri1</ReservedDBInstanceId></ReservedDBInstance></ReservedDBInstances>
                    <Marker>tok-2</Marker>
                </DescribeReservedDBInstancesResult>
                <ResponseMetadata><RequestId>r</RequestId></ResponseMetadata>
            </DescribeReservedDBInstancesResponse>"#
                .to_string(),
            "cloudfront_listDistributions" => r#"<?xml version="1.0" encoding="UTF-8"?>
            <DistributionList xmlns="http://cloudfront.amazonaws.com/doc/2020-05-31/">
                <Marker></Marker>
                <NextMarker>tok-2</NextMarker>
                <MaxItems>1</MaxItems>
                <IsTruncated>true</IsTruncated>
                <Quantity>1</Quantity>
                <Items><DistributionSummary><Id>EDFDVBD6EXAMPLE</Id></DistributionSummary></Items>
            </DistributionList>"#
                .to_string(),
            "lambda_listFunctions" => {
                r#"{"Functions":[{"FunctionName":"fn-1"}],"NextMarker":"tok-2"}"#.to_string()
            }
            other => panic!("no wire page for paginated endpoint {}", other),
        }
    }

    #[test]
    fn test_registry_token_paths_match_decoded_responses() {
        use crate::aws::http::decode_response;
        use crate::resource::registry::get_registry;

        let mut checked = 0;
        for (name, endpoint) in &get_registry().endpoints {
            let Some(paginator) = &endpoint.paginator else {
                continue;
            };

            let body = wire_page(name);
            let protocol = endpoint.service.definition().protocol;
            let page = decode_response(protocol, &endpoint.operation, &body)
                .unwrap_or_else(|e| panic!("{} page should decode: {:#}", name, e));

            assert_eq!(
                next_token(&page, &paginator.output_token),
                Some("tok-2".to_string()),
                "{} reads its token from '{}' in {}",
                name,
                paginator.output_token,
                page
            );
            checked += 1;
        }

        assert_eq!(checked, 21, "every paginated endpoint has a wire page");
    }

    #[test]
    fn test_last_page_without_token_ends_pagination() {
        use crate::aws::http::{decode_response, Protocol};

        let last = decode_response(
            Protocol::RestXml,
            "ListDistributions",
            "<DistributionList><Marker>tok-2</Marker><IsTruncated>false</IsTruncated><Items/></DistributionList>",
        )
        .expect("decodes");
        assert_eq!(next_token(&last, "NextMarker"), None);

        let last = decode_response(
            Protocol::Query,
            "DescribeLoadBalancers",
            "<DescribeLoadBalancersResponse><DescribeLoadBalancersResult><LoadBalancers/></DescribeLoadBalancersResult></DescribeLoadBalancersResponse>",
        )
        .expect("decodes");
        assert_eq!(next_token(&last, "NextMarker"), None);
    }
}

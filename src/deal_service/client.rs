//! Boost client: GraphQL for deal queries, JSON-RPC for offline imports

use super::{DealQuery, DealService, DealServiceConnector, ImportOutcome};
use crate::config::DealServiceConfig;
use crate::error::{Error, Result};
use crate::types::DealRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const DEALS_QUERY: &str = r#"query Deals($query: String, $filter: DealFilter, $limit: Int) {
  deals(query: $query, filter: $filter, limit: $limit) {
    deals {
      ID
      Message
      PieceCid
      IsOffline
      ClientAddress
      Checkpoint
      StartEpoch { n }
      InboundFilePath
      Err
    }
  }
}"#;

const OFFLINE_IMPORT_METHOD: &str = "Filecoin.BoostOfflineDealWithData";

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: DealsVariables<'a>,
}

#[derive(Serialize)]
struct DealsVariables<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<DealFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DealFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_offline: Option<bool>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<DealsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct DealsData {
    deals: DealList,
}

#[derive(Deserialize)]
struct DealList {
    #[serde(default)]
    deals: Vec<DealRecord>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: (String, &'a Path, bool),
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Rejection>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Rejection {
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

impl<'a> DealsVariables<'a> {
    fn from_query(query: &'a DealQuery) -> Self {
        let filter = if query.checkpoint.is_some() || query.is_offline.is_some() {
            Some(DealFilter {
                checkpoint: query.checkpoint.map(|c| c.as_str()),
                is_offline: query.is_offline,
            })
        } else {
            None
        };

        Self {
            query: query.search.as_deref(),
            filter,
            limit: query.limit,
        }
    }
}

/// HTTP client for a Boost node
pub struct BoostClient {
    http: reqwest::Client,
    graphql_url: String,
    rpc_url: String,
    auth_token: String,
}

impl BoostClient {
    /// Build a client with its own connection pool
    pub fn new(config: &DealServiceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("deal-importer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            graphql_url: config.graphql_endpoint(),
            rpc_url: config.rpc_endpoint(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl DealService for BoostClient {
    async fn query_deals(&self, query: &DealQuery) -> Result<Vec<DealRecord>> {
        let request = GraphQlRequest {
            query: DEALS_QUERY,
            variables: DealsVariables::from_query(query),
        };

        let response = self.http.post(&self.graphql_url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DealService(format!(
                "graphql returned {}: {}",
                status, body
            )));
        }

        let body: GraphQlResponse = response.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(Error::DealService(messages.join("; ")));
        }

        Ok(body.data.map(|d| d.deals.deals).unwrap_or_default())
    }

    async fn import_offline_deal(
        &self,
        deal_id: Uuid,
        file_path: &Path,
        delete_after_import: bool,
    ) -> Result<ImportOutcome> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method: OFFLINE_IMPORT_METHOD,
            params: (deal_id.to_string(), file_path, delete_after_import),
            id: 1,
        };

        let response = self
            .http
            .post(&self.rpc_url)
            .bearer_auth(&self.auth_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DealService(format!(
                "rpc returned {}: {}",
                status, body
            )));
        }

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(Error::DealService(format!(
                "{} (code {})",
                err.message, err.code
            )));
        }

        match body.result {
            Some(rejection) if !rejection.reason.is_empty() => {
                Ok(ImportOutcome::Rejected(rejection.reason))
            }
            _ => Ok(ImportOutcome::Accepted),
        }
    }
}

/// Connects to Boost with a fresh [`BoostClient`] each time
pub struct BoostConnector {
    config: DealServiceConfig,
}

impl BoostConnector {
    /// Connector for the configured node
    pub fn new(config: DealServiceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DealServiceConnector for BoostConnector {
    async fn connect(&self) -> Result<Arc<dyn DealService>> {
        let client: Arc<dyn DealService> = Arc::new(BoostClient::new(&self.config)?);
        Ok(client)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Checkpoint;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> BoostClient {
        let uri = url::Url::parse(&server.uri()).unwrap();
        let port = uri.port().unwrap();
        let config = DealServiceConfig {
            url: format!("http://{}", uri.host_str().unwrap()),
            rpc_port: port,
            graphql_port: port,
            auth_token: "eyJ.secret".to_string(),
            ..Default::default()
        };
        BoostClient::new(&config).unwrap()
    }

    fn deals_body(deals: serde_json::Value) -> serde_json::Value {
        json!({ "data": { "deals": { "deals": deals } } })
    }

    #[tokio::test]
    async fn query_sends_filter_and_decodes_deals() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/query"))
            .and(body_partial_json(json!({
                "variables": {
                    "query": "f1client",
                    "filter": { "Checkpoint": "Accepted", "IsOffline": true },
                    "limit": 100
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(deals_body(json!([{
                "ID": "4d0fa7c4-3a39-4b0e-9b3c-6a8c0f6b9d11",
                "Message": "Awaiting Offline Data Import",
                "PieceCid": "baga1",
                "IsOffline": true,
                "ClientAddress": "f1client",
                "Checkpoint": "Accepted",
                "StartEpoch": { "n": "3000000" },
                "InboundFilePath": "",
                "Err": ""
            }]))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let deals = client
            .query_deals(
                &DealQuery::new()
                    .search("f1client")
                    .checkpoint(Checkpoint::Accepted)
                    .offline(true)
                    .limit(100),
            )
            .await
            .unwrap();

        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].piece_cid, "baga1");
        assert_eq!(deals[0].start_epoch.height, "3000000");
    }

    #[test]
    fn unfiltered_query_omits_filter_variable() {
        let query = DealQuery::new().search("baga1").limit(5);
        let vars = serde_json::to_value(DealsVariables::from_query(&query)).unwrap();
        assert_eq!(vars, json!({ "query": "baga1", "limit": 5 }));
    }

    #[tokio::test]
    async fn graphql_errors_become_deal_service_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "unknown checkpoint" }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .query_deals(&DealQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DealService(ref m) if m == "unknown checkpoint"));
    }

    #[tokio::test]
    async fn graphql_http_failure_is_an_error_not_a_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/query"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .query_deals(&DealQuery::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad gateway"));
    }

    #[tokio::test]
    async fn import_posts_jsonrpc_with_bearer_token() {
        let server = MockServer::start().await;
        let deal_id = Uuid::parse_str("4d0fa7c4-3a39-4b0e-9b3c-6a8c0f6b9d11").unwrap();

        Mock::given(method("POST"))
            .and(path("/rpc/v0"))
            .and(header("authorization", "Bearer eyJ.secret"))
            .and(body_partial_json(json!({
                "method": "Filecoin.BoostOfflineDealWithData",
                "params": ["4d0fa7c4-3a39-4b0e-9b3c-6a8c0f6b9d11", "/staging/baga1.car", true]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": null })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .import_offline_deal(deal_id, Path::new("/staging/baga1.car"), true)
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Accepted);
    }

    #[tokio::test]
    async fn import_rejection_reason_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/v0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": { "Accepted": false, "Reason": "deal not found" }
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .import_offline_deal(Uuid::new_v4(), Path::new("/x.car"), false)
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Rejected("deal not found".into()));
    }

    #[tokio::test]
    async fn import_rpc_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/v0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": 1, "message": "file does not exist" }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .import_offline_deal(Uuid::new_v4(), Path::new("/x.car"), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file does not exist"));
    }
}

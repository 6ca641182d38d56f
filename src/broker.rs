//! Dataset broker client
//!
//! In the pull modes the importer asks a self-service broker to make a deal
//! with this provider, either for "any piece of dataset X" or for one
//! specific piece CID. The broker answers with the piece CID the deal was
//! made for; the deal then shows up in the deal service some time later.

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Header carrying the broker API token
pub const AUTH_HEADER: &str = "X-DELTA-AUTH";

/// Requests new deals from the broker
#[async_trait]
pub trait DatasetBroker: Send + Sync {
    /// Ask for a deal on some not-yet-replicated piece of a dataset
    async fn request_deal_for_dataset(&self, dataset: &str) -> Result<String>;

    /// Ask for a deal on one piece CID
    async fn request_deal_for_cid(&self, piece_cid: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct BrokerResponse {
    #[serde(default)]
    cid: String,
}

/// Broker client over HTTP
pub struct HttpBroker {
    http: reqwest::Client,
    base_url: String,
    token: String,
    delay_start_epoch: u64,
    advance_end_epoch: u64,
}

impl HttpBroker {
    /// Build a client from the broker settings
    ///
    /// Fails when the URL is missing or malformed, or the token is missing.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::config("broker url is not set", "broker.url"))?;
        url::Url::parse(base_url).map_err(|e| {
            Error::config(format!("broker url {base_url:?} is invalid: {e}"), "broker.url")
        })?;
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::config("broker token is not set", "broker.token"))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            delay_start_epoch: config.delay_start_epoch,
            advance_end_epoch: config.advance_end_epoch,
        })
    }

    fn url(&self, kind: &str, value: &str) -> String {
        format!(
            "{}/{}/{}?start_epoch_delay={}&end_epoch_advance={}",
            self.base_url,
            kind,
            urlencoding::encode(value),
            self.delay_start_epoch,
            self.advance_end_epoch
        )
    }

    async fn request(&self, url: String) -> Result<String> {
        tracing::debug!(url = %url, "Requesting deal from broker");

        let response = self
            .http
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(Error::Broker {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BrokerResponse = serde_json::from_str(&body)?;
        if parsed.cid.is_empty() {
            return Err(Error::Broker {
                status: status.as_u16(),
                body: format!("response carried no cid: {body}"),
            });
        }
        Ok(parsed.cid)
    }
}

#[async_trait]
impl DatasetBroker for HttpBroker {
    async fn request_deal_for_dataset(&self, dataset: &str) -> Result<String> {
        self.request(self.url("by-dataset", dataset)).await
    }

    async fn request_deal_for_cid(&self, piece_cid: &str) -> Result<String> {
        self.request(self.url("by-cid", piece_cid)).await
    }
}

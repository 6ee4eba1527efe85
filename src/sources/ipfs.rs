//! IPFS access: fetch through public gateways, upload and pin through the
//! configured pinning endpoints.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::config::{IpfsConfig, RetryConfig};
use crate::prelude::*;
use crate::retry::retry_with;
use crate::sources::graph::CONNECT_TIMEOUT;

/// Per-gateway budget; the next gateway is tried on expiry.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Content identifiers arrive with either prefix or bare.
pub fn strip_prefix(uri: &str) -> &str {
    uri.trim_start_matches("ipfs://").trim_start_matches("/ipfs/")
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Clone)]
pub struct IpfsClient {
    http: reqwest::Client,
    fetch_endpoints: Vec<String>,
    pin_endpoints: Vec<String>,
    retries: RetryConfig,
}

impl IpfsClient {
    pub fn new(config: &IpfsConfig, retries: RetryConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(Error::client)?;

        Ok(Self {
            http,
            fetch_endpoints: config.fetch_endpoints.clone(),
            pin_endpoints: config.pin_endpoints.clone(),
            retries,
        })
    }

    /// Fetches a JSON document by CID; first gateway to answer wins.
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(&self, uri: &str) -> Result<T, Error> {
        let cid = strip_prefix(uri).to_string();

        retry_with(&self.retries, "ipfs fetch", || async {
            for gateway in &self.fetch_endpoints {
                let url = format!("{}/ipfs/{}", gateway.trim_end_matches('/'), cid);

                let attempt = async {
                    let response = self
                        .http
                        .get(&url)
                        .timeout(GATEWAY_TIMEOUT)
                        .send()
                        .await?
                        .error_for_status()?;

                    Ok::<T, Error>(response.json().await?)
                };

                match attempt.await {
                    Ok(value) => return Ok(value),
                    Err(err) => warn!(%err, %gateway, "ipfs gateway failed"),
                }
            }

            Err(Error::client(format!("all ipfs gateways failed for {cid}")))
        })
        .await
    }

    /// Uploads a JSON document, pins it, and returns its `ipfs://` URI.
    /// Pinning endpoints are tried in order; first success wins.
    pub async fn add_and_pin(&self, body: Vec<u8>) -> Result<String, Error> {
        retry_with(&self.retries, "ipfs pin", || async {
            for endpoint in &self.pin_endpoints {
                match self.add_and_pin_at(endpoint, body.clone()).await {
                    Ok(cid) => return Ok(format!("ipfs://{cid}")),
                    Err(err) => warn!(%err, %endpoint, "ipfs pin endpoint failed"),
                }
            }

            Err(Error::client("all ipfs pin endpoints failed"))
        })
        .await
    }

    async fn add_and_pin_at(&self, endpoint: &str, body: Vec<u8>) -> Result<String, Error> {
        let endpoint = endpoint.trim_end_matches('/');

        let part = reqwest::multipart::Part::bytes(body).file_name("claims.json");
        let form = reqwest::multipart::Form::new().part("file", part);

        let added: AddResponse = self
            .http
            .post(format!("{endpoint}/api/v0/add"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.http
            .post(format!("{endpoint}/api/v0/pin/add?arg={}", added.hash))
            .send()
            .await?
            .error_for_status()?;

        Ok(added.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_stripped() {
        assert_eq!(strip_prefix("ipfs://QmAbc"), "QmAbc");
        assert_eq!(strip_prefix("/ipfs/QmAbc"), "QmAbc");
        assert_eq!(strip_prefix("QmAbc"), "QmAbc");
    }
}

//! Vote publication to the shared object store.
//!
//! The aggregator reads votes from `{bucket}/{oracle_address}/{vote_name}`;
//! objects are written world-readable and the write is confirmed by reading
//! the object back before the controller proceeds.

use serde::Serialize;

use crate::config::{RetryConfig, StoreConfig};
use crate::prelude::*;
use crate::retry::retry_with;
use crate::sources::graph::{CONNECT_TIMEOUT, QUERY_TIMEOUT};

#[derive(Clone)]
pub struct VoteStore {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    authorization: Option<String>,
    retries: RetryConfig,
}

impl VoteStore {
    pub fn new(config: &StoreConfig, retries: RetryConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(Error::client)?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            authorization: config.authorization.clone(),
            retries,
        })
    }

    pub async fn publish<V: Serialize>(
        &self,
        oracle: &str,
        name: &str,
        vote: &V,
    ) -> Result<(), Error> {
        let url = format!("{}/{}/{}/{}", self.endpoint, self.bucket, oracle, name);
        let body = serde_json::to_vec(vote)?;

        retry_with(&self.retries, "vote upload", || {
            let body = body.clone();
            let url = url.clone();

            async move {
                let mut request = self
                    .http
                    .put(&url)
                    .header("content-type", "application/json")
                    .header("x-amz-acl", "public-read")
                    .body(body);

                if let Some(authorization) = &self.authorization {
                    request = request.header("authorization", authorization);
                }

                request.send().await?.error_for_status()?;

                Ok(())
            }
        })
        .await?;

        self.wait_readable(&url).await
    }

    /// The object must be readable before the tick may continue; a missing
    /// object reads as a transient failure and is retried.
    async fn wait_readable(&self, url: &str) -> Result<(), Error> {
        retry_with(&self.retries, "vote readback", || async {
            self.http.get(url).send().await?.error_for_status()?;

            Ok(())
        })
        .await
    }
}

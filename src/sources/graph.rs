//! GraphQL transport shared by all subgraph sources.
//!
//! Three concerns live here: executing a single query against one endpoint,
//! walking an id-ordered collection page by page, and fanning one query out
//! to a set of replica endpoints under majority consensus.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::config::RetryConfig;
use crate::prelude::*;
use crate::retry::retry_with;

/// Entities fetched per page. A short page terminates iteration.
pub const PAGE_SIZE: usize = 1000;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    retries: RetryConfig,
}

impl GraphClient {
    pub fn new(retries: RetryConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(Error::client)?;

        Ok(Self { http, retries })
    }

    /// Executes one query with retries on transient transport failures.
    pub async fn query(
        &self,
        endpoint: &str,
        document: &str,
        variables: &Value,
    ) -> Result<Value, Error> {
        retry_with(&self.retries, "graphql query", || {
            self.execute(endpoint, document, variables)
        })
        .await
    }

    async fn execute(
        &self,
        endpoint: &str,
        document: &str,
        variables: &Value,
    ) -> Result<Value, Error> {
        let body = json!({ "query": document, "variables": variables });

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let payload: Value = response.json().await?;

        if let Some(errors) = payload.get("errors").filter(|e| !e.is_null()) {
            return Err(Error::client(format!("graphql errors: {errors}")));
        }

        payload
            .get("data")
            .cloned()
            .ok_or_else(|| Error::parse("graphql response without data"))
    }

    /// Walks `field` with the id cursor until a short page is returned.
    /// The `last_id` variable is injected into `variables` on every call.
    pub async fn paginate(
        &self,
        endpoint: &str,
        document: &str,
        variables: &Value,
        field: &str,
    ) -> Result<Vec<Value>, Error> {
        collect_pages(|last_id| async move {
            let mut variables = variables.clone();
            variables["last_id"] = Value::String(last_id);

            let data = self.query(endpoint, document, &variables).await?;

            data.get(field)
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| Error::parse(format!("graphql response without {field}")))
        })
        .await
    }
}

/// Accumulates id-cursored pages until a short page arrives.
///
/// Every entity must carry a unique `id`; seeing the same id twice means
/// the upstream served inconsistent pages and the whole read is discarded.
pub async fn collect_pages<F, Fut>(mut fetch: F) -> Result<Vec<Value>, Error>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, Error>>,
{
    let mut entities = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_id = String::new();

    loop {
        let page = fetch(last_id.clone()).await?;
        let received = page.len();

        for entity in page {
            let id = entity
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::parse("entity without id"))?
                .to_string();

            if !seen.insert(id.clone()) {
                return Err(Error::PaginationError(id));
            }

            last_id = id;
            entities.push(entity);
        }

        if received < PAGE_SIZE {
            return Ok(entities);
        }
    }
}

/// Queries every replica endpoint concurrently and keeps the answer whose
/// projected key is the largest one that a majority of replicas agree on.
pub async fn fetch_consensus<T, F, Fut, K>(
    endpoints: &[String],
    call: F,
    key: K,
) -> Result<T, Error>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    K: Fn(&T) -> u64,
{
    let queries = endpoints.iter().cloned().map(&call);
    let results = futures_util::future::join_all(queries).await;

    let total = results.len();
    let values: Vec<T> = results
        .into_iter()
        .zip(endpoints)
        .filter_map(|(result, endpoint)| match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%err, %endpoint, "replica endpoint failed");
                None
            }
        })
        .collect();

    find_max_consensus(values, total, key)
}

/// Largest key reported identically by at least `total / 2 + 1` results
/// wins. A key only some replicas have moved past does not count as
/// agreement on it.
pub fn find_max_consensus<T, K>(mut values: Vec<T>, total: usize, key: K) -> Result<T, Error>
where
    K: Fn(&T) -> u64,
{
    let majority = total / 2 + 1;
    let keys: Vec<u64> = values.iter().map(&key).collect();

    let mut maximum = 0u64;
    let mut winner: Option<usize> = None;

    for (i, k) in keys.iter().enumerate() {
        let agreeing = keys.iter().filter(|x| *x == k).count();

        if agreeing >= majority && (winner.is_none() || *k > maximum) {
            maximum = *k;
            winner = Some(i);
        }
    }

    match winner {
        Some(i) => Ok(values.swap_remove(i)),
        None => Err(Error::ConsensusError {
            got: values.len(),
            total,
        }),
    }
}

//! Beacon-chain REST client.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

use crate::config::{BeaconConfig, RetryConfig};
use crate::prelude::*;
use crate::retry::retry_with;
use crate::sources::graph::{CONNECT_TIMEOUT, QUERY_TIMEOUT};

/// Statuses of a validator that has deposited but is not participating
/// yet. Pending validators carry no rewards and are not counted as
/// activated.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
}

impl ValidatorStatus {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ValidatorStatus::PendingInitialized | ValidatorStatus::PendingQueued
        )
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct ValidatorInfo {
    pub status: ValidatorStatus,

    /// Current balance, in gwei.
    #[serde_as(as = "DisplayFromStr")]
    pub balance: u64,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Genesis {
    #[serde_as(as = "DisplayFromStr")]
    pub genesis_time: u64,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
struct Checkpoint {
    #[serde_as(as = "DisplayFromStr")]
    epoch: u64,
}

#[derive(Clone, Debug, Deserialize)]
struct FinalityCheckpoints {
    finalized: Checkpoint,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Clone)]
pub struct BeaconClient {
    http: reqwest::Client,
    endpoint: String,
    retries: RetryConfig,
}

impl BeaconClient {
    pub fn new(config: &BeaconConfig, retries: RetryConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(Error::client)?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            retries,
        })
    }

    pub async fn genesis(&self) -> Result<Genesis, Error> {
        let url = format!("{}/eth/v1/beacon/genesis", self.endpoint);

        self.get::<Genesis>(&url).await
    }

    /// Epoch the chain considers finalized right now.
    pub async fn finalized_epoch(&self) -> Result<u64, Error> {
        let url = format!(
            "{}/eth/v1/beacon/states/head/finality_checkpoints",
            self.endpoint
        );

        let checkpoints = self.get::<FinalityCheckpoints>(&url).await?;

        Ok(checkpoints.finalized.epoch)
    }

    /// Validator states at `state_id` for one chunk of public keys.
    pub async fn validators(
        &self,
        state_id: &str,
        public_keys: &[String],
    ) -> Result<Vec<ValidatorInfo>, Error> {
        if public_keys.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/eth/v1/beacon/states/{}/validators?id={}",
            self.endpoint,
            state_id,
            public_keys.join(",")
        );

        self.get::<Vec<ValidatorInfo>>(&url).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        retry_with(&self.retries, "beacon api", || async {
            let response = self.http.get(url).send().await?.error_for_status()?;
            let envelope: Envelope<T> = response.json().await?;

            Ok(envelope.data)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_statuses_are_classified() {
        assert!(ValidatorStatus::PendingInitialized.is_pending());
        assert!(ValidatorStatus::PendingQueued.is_pending());
        assert!(!ValidatorStatus::ActiveOngoing.is_pending());
        assert!(!ValidatorStatus::ExitedSlashed.is_pending());
    }

    #[test]
    fn validator_payload_parses_string_balances() {
        let raw = r#"{
            "data": [
                { "status": "active_ongoing", "balance": "32001000000" },
                { "status": "pending_queued", "balance": "32000000000" }
            ]
        }"#;

        let envelope: Envelope<Vec<ValidatorInfo>> = serde_json::from_str(raw).unwrap();

        assert_eq!(envelope.data.len(), 2);
        assert_eq!(envelope.data[0].balance, 32_001_000_000);
        assert!(envelope.data[1].status.is_pending());
    }
}

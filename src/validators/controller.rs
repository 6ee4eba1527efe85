//! Validator controller: picks the next registrable deposit data across
//! the configured operators and votes on it together with the deposit-root
//! interlock.

use std::collections::HashSet;

use tracing::info;

use crate::prelude::*;
use crate::sources::ipfs::IpfsClient;
use crate::sources::protocol::{Operator, ProtocolSource};
use crate::vote::VotePublisher;

pub struct ValidatorsController {
    protocol: ProtocolSource,
    ipfs: IpfsClient,
    publisher: VotePublisher,
}

impl ValidatorsController {
    pub fn new(protocol: ProtocolSource, ipfs: IpfsClient, publisher: VotePublisher) -> Self {
        Self {
            protocol,
            ipfs,
            publisher,
        }
    }

    pub async fn process(
        &self,
        params: &ValidatorsVotingParameters,
        block: BlockNumber,
    ) -> Result<(), Error> {
        if params.pool_balance < deposit_amount() {
            // not enough pooled to register a validator
            return Ok(());
        }

        let operators = self.protocol.operators(block).await?;
        let used: HashSet<String> = self
            .protocol
            .registered_public_keys(block)
            .await?
            .into_iter()
            .collect();

        let Some(selected) = self.select_deposit_data(&operators, &used, block).await? else {
            info!("no registrable deposit data across operators");
            return Ok(());
        };

        // the interlock root is read after selection, from the same block,
        // so a deposit slipped in front of the vote invalidates it
        let deposit_root = self.protocol.validators_deposit_root(block).await?;

        if self.nonce_advanced(params.nonce).await? {
            info!("validators nonce advanced, abandoning tick");
            return Ok(());
        }

        info!(
            operator = %selected.operator,
            public_key = %selected.public_key,
            nonce = params.nonce,
            "submitting validators vote"
        );

        self.publisher
            .submit_validators(params.nonce, vec![selected], deposit_root)
            .await
    }

    /// Walks each operator's deposit-data file starting at its on-chain
    /// index, skipping keys that were already registered. The on-chain
    /// index itself is advanced by the aggregator, never here.
    async fn select_deposit_data(
        &self,
        operators: &[Operator],
        used: &HashSet<String>,
        block: BlockNumber,
    ) -> Result<Option<DepositData>, Error> {
        for operator in operators {
            let Some(uri) = &operator.deposit_data_uri else {
                continue;
            };

            let deposit_data: Vec<DepositData> = self.ipfs.fetch_json(uri).await?;

            let mut index = operator.deposit_data_index as usize;
            while let Some((found, candidate)) = next_unused(&deposit_data, index, used) {
                let public_key = candidate.public_key.to_string();

                if self.protocol.validator_registered(&public_key, block).await? {
                    // the key made it on chain in a previous round
                    index = found + 1;
                    continue;
                }

                return Ok(Some(candidate.clone()));
            }
        }

        Ok(None)
    }

    async fn nonce_advanced(&self, nonce: u64) -> Result<bool, Error> {
        let tip = self.protocol.finalized_block().await?;
        let fresh = self.protocol.voting_parameters(tip.number).await?;

        Ok(fresh.validators.nonce != nonce)
    }
}

/// First entry at or after `start` whose key is not in the used set.
fn next_unused<'a>(
    deposit_data: &'a [DepositData],
    start: usize,
    used: &HashSet<String>,
) -> Option<(usize, &'a DepositData)> {
    deposit_data
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, candidate)| !used.contains(&candidate.public_key.to_string()))
}

//! Distributor controller: allocates the period's reward budgets, merges
//! the unclaimed carry-over, commits to the result and votes on it.

use futures_util::future::join_all;
use tracing::info;

use crate::config::PoolsConfig;
use crate::distributor::allocator::Allocator;
use crate::distributor::engines::PositionSource;
use crate::distributor::merkle::{build_claims, unclaimed_rewards, Claims};
use crate::prelude::*;
use crate::sources::ipfs::IpfsClient;
use crate::sources::protocol::ProtocolSource;
use crate::vote::VotePublisher;

pub struct DistributorController<S: PositionSource> {
    protocol: ProtocolSource,
    ipfs: IpfsClient,
    source: S,
    pools: PoolsConfig,
    publisher: VotePublisher,
}

impl<S: PositionSource> DistributorController<S> {
    pub fn new(
        protocol: ProtocolSource,
        ipfs: IpfsClient,
        source: S,
        pools: PoolsConfig,
        publisher: VotePublisher,
    ) -> Self {
        Self {
            protocol,
            ipfs,
            source,
            pools,
            publisher,
        }
    }

    pub async fn process(&self, params: &DistributorVotingParameters) -> Result<(), Error> {
        if params.to_block <= params.from_block {
            // rewards have not updated since the last distribution
            return Ok(());
        }

        let range = BlockRange {
            from_block: params.from_block,
            to_block: params.to_block,
        };

        let descriptors = self.protocol.periodic_distributions(&range).await?;
        info!(
            count = descriptors.len(),
            from_block = range.from_block,
            to_block = range.to_block,
            "allocating period distributions"
        );

        let allocator = Allocator::new(&self.source, &self.pools, range);
        let allocations = join_all(
            descriptors
                .iter()
                .map(|d| allocator.allocate(d.contract, d.reward, d.reward_token)),
        )
        .await;

        let mut rewards = Rewards::default();
        for allocation in allocations {
            rewards.merge(allocation?);
        }

        let redirects = self.protocol.redirects(range.to_block).await?;
        rewards.redirect(&redirects);

        // accounts that have not redeemed from the previous root keep
        // their balance in the new one; a missing prior file fails the
        // tick rather than inventing carry-over state
        if let Some(previous_uri) = &params.last_merkle_proofs {
            let claimed_range = BlockRange {
                from_block: params.last_updated_at_block,
                to_block: range.to_block,
            };
            let claimed = self.protocol.claimed_accounts(&claimed_range).await?;
            let previous: Claims = self.ipfs.fetch_json(previous_uri).await?;

            rewards.merge(unclaimed_rewards(&previous, &claimed)?);
        }

        if rewards.is_empty() {
            info!("no rewards to distribute this period");
            return Ok(());
        }

        let (merkle_root, claims) = build_claims(&rewards)?;
        let proofs_uri = self.ipfs.add_and_pin(serde_json::to_vec(&claims)?).await?;

        if self.nonce_advanced(params.nonce).await? {
            info!("distributor nonce advanced, abandoning tick");
            return Ok(());
        }

        info!(%merkle_root, %proofs_uri, nonce = params.nonce, "submitting distributor vote");
        self.publisher
            .submit_distributor(params.nonce, proofs_uri, merkle_root)
            .await
    }

    async fn nonce_advanced(&self, nonce: u64) -> Result<bool, Error> {
        let tip = self.protocol.finalized_block().await?;
        let fresh = self.protocol.voting_parameters(tip.number).await?;

        Ok(fresh.distributor.nonce != nonce)
    }
}

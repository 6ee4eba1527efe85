//! Protocol subgraph reads.
//!
//! The protocol subgraph is replicated; block-level reads (finalized block,
//! sync height, voting parameters) go through majority consensus across all
//! replicas, while paginated collection walks run against the first replica
//! that answers.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::GraphConfig;
use crate::prelude::*;
use crate::sources::graph::{fetch_consensus, GraphClient};
use crate::sources::{address_field, queries, str_field, u256_field, u64_field};

/// A node operator and its deposit-data cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
    pub address: Address,
    pub deposit_data_uri: Option<String>,
    pub deposit_data_index: u64,
}

#[derive(Clone)]
pub struct ProtocolSource {
    graph: GraphClient,
    endpoints: Vec<String>,
    confirmation_blocks: u64,
}

impl ProtocolSource {
    pub fn new(graph: GraphClient, config: &GraphConfig, confirmation_blocks: u64) -> Self {
        Self {
            graph,
            endpoints: config.endpoints.clone(),
            confirmation_blocks,
        }
    }

    /// The newest block buried under the confirmation depth, as agreed by
    /// the majority of replicas.
    pub async fn finalized_block(&self) -> Result<Block, Error> {
        let variables = json!({ "confirmation_blocks": self.confirmation_blocks });

        fetch_consensus(
            &self.endpoints,
            |endpoint| {
                let variables = variables.clone();
                async move {
                    let data = self
                        .graph
                        .query(&endpoint, queries::FINALIZED_BLOCK, &variables)
                        .await?;
                    let block = first(&data, "blocks")?;

                    Ok(Block {
                        number: u64_field(&block, "id")?,
                        timestamp: u64_field(&block, "timestamp")?,
                    })
                }
            },
            |block| block.number,
        )
        .await
    }

    /// Whether the majority of replicas have indexed `block` already.
    pub async fn has_synced(&self, block: BlockNumber) -> Result<bool, Error> {
        let synced = fetch_consensus(
            &self.endpoints,
            |endpoint| async move {
                let data = self
                    .graph
                    .query(&endpoint, queries::SYNC_BLOCK, &Value::Null)
                    .await?;

                data.pointer("/_meta/block/number")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::parse("sync block without number"))
            },
            |height| *height,
        )
        .await?;

        Ok(block <= synced)
    }

    pub async fn voting_parameters(&self, block: BlockNumber) -> Result<VotingParameters, Error> {
        let variables = json!({ "block_number": block });

        fetch_consensus(
            &self.endpoints,
            |endpoint| {
                let variables = variables.clone();
                async move {
                    let data = self
                        .graph
                        .query(&endpoint, queries::VOTING_PARAMETERS, &variables)
                        .await?;
                    parse_voting_parameters(&data)
                }
            },
            |params| params.rewards.nonce,
        )
        .await
    }

    /// Checks that the signing address belongs to the on-chain oracles set.
    pub async fn is_oracle_member(
        &self,
        oracle: Address,
        block: BlockNumber,
    ) -> Result<bool, Error> {
        let variables = json!({
            "oracle": format!("{oracle:#x}"),
            "block_number": block,
        });

        let data = self.query_any(queries::ORACLE_MEMBER, &variables).await?;
        let oracles = data
            .get("oracles")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::parse("response without oracles"))?;

        Ok(!oracles.is_empty())
    }

    /// Reward budgets active inside the range, prorated by block overlap.
    /// The final interval of a distribution absorbs the division leftover
    /// so the full amount is eventually handed out.
    pub async fn periodic_distributions(
        &self,
        range: &BlockRange,
    ) -> Result<Vec<DistributionDescriptor>, Error> {
        let variables = json!({
            "from_block": range.from_block,
            "block_number": range.to_block,
        });

        let entities = self
            .paginate_any(queries::PERIODIC_DISTRIBUTIONS, &variables, "periodicDistributions")
            .await?;

        let mut descriptors = Vec::new();
        for entity in entities {
            let start_block = u64_field(&entity, "startBlock")?;
            let end_block = u64_field(&entity, "endBlock")?;

            if end_block <= range.from_block || start_block >= range.to_block {
                continue;
            }

            let duration = end_block.saturating_sub(start_block);
            if duration == 0 {
                continue;
            }

            let amount = u256_field(&entity, "amount")?;
            let overlap_start = range.from_block.max(start_block);
            let overlap_end = range.to_block.min(end_block);
            let overlap = overlap_end.saturating_sub(overlap_start);

            let per_block = amount / U256::from(duration);
            let mut reward = per_block * U256::from(overlap);
            if overlap_end == end_block {
                reward += amount - per_block * U256::from(duration);
            }

            if reward.is_zero() {
                continue;
            }

            descriptors.push(DistributionDescriptor {
                contract: address_field(&entity, "beneficiary")?,
                reward,
                reward_token: address_field(&entity, "token")?,
            });
        }

        Ok(descriptors)
    }

    /// Accounts that redeemed from the distributor after `from_block`.
    pub async fn claimed_accounts(
        &self,
        range: &BlockRange,
    ) -> Result<HashSet<Address>, Error> {
        let variables = json!({
            "from_block": range.from_block,
            "block_number": range.to_block,
        });

        let entities = self
            .paginate_any(queries::CLAIMED_ACCOUNTS, &variables, "merkleDistributorClaims")
            .await?;

        entities
            .iter()
            .map(|entity| address_field(entity, "account"))
            .collect()
    }

    pub async fn redirects(
        &self,
        block: BlockNumber,
    ) -> Result<BTreeMap<Address, Address>, Error> {
        let variables = json!({ "block_number": block });

        let entities = self
            .paginate_any(queries::DISTRIBUTOR_REDIRECTS, &variables, "distributorRedirects")
            .await?;

        let mut redirects = BTreeMap::new();
        for entity in entities {
            let from = address_field(&entity, "id")?;
            let to = entity
                .pointer("/token/id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::parse("redirect without target token"))?
                .parse::<Address>()
                .map_err(Error::parse)?;

            redirects.insert(from, to);
        }

        Ok(redirects)
    }

    /// Time-weighted holder points of a distributor token:
    /// `points = prev_points + principal x (to_block - updated_at)`, with
    /// `prev_points` reset when the last update precedes the range.
    pub async fn token_points(
        &self,
        token: Address,
        range: &BlockRange,
    ) -> Result<Balances, Error> {
        let variables = json!({
            "token_address": format!("{token:#x}"),
            "block_number": range.to_block,
        });

        let entities = self
            .paginate_any(queries::DISTRIBUTOR_TOKEN_HOLDERS, &variables, "distributorTokenHolders")
            .await?;

        accumulate_points(&entities, "amount", "distributorPoints", range)
    }

    /// Lending supplier points of a ctoken, weighted the same way as
    /// distributor token holders.
    pub async fn lending_points(
        &self,
        ctoken: Address,
        range: &BlockRange,
    ) -> Result<Balances, Error> {
        let variables = json!({
            "ctoken": format!("{ctoken:#x}"),
            "block_number": range.to_block,
        });

        let entities = self
            .paginate_any(queries::LENDING_SUPPLIERS, &variables, "lendingPositions")
            .await?;

        accumulate_points(&entities, "amount", "points", range)
    }

    /// BLS public keys of every validator registered through the pool.
    pub async fn registered_public_keys(
        &self,
        block: BlockNumber,
    ) -> Result<Vec<String>, Error> {
        let variables = json!({ "block_number": block });

        let entities = self
            .paginate_any(queries::REGISTERED_VALIDATORS, &variables, "validators")
            .await?;

        entities
            .iter()
            .map(|entity| str_field(entity, "id").map(str::to_string))
            .collect()
    }

    pub async fn operators(&self, block: BlockNumber) -> Result<Vec<Operator>, Error> {
        let variables = json!({ "block_number": block });

        let entities = self
            .paginate_any(queries::OPERATORS, &variables, "operators")
            .await?;

        let mut operators = Vec::new();
        for entity in entities {
            let uri = entity
                .get("depositDataMerkleProofs")
                .and_then(Value::as_str)
                .filter(|uri| !uri.is_empty())
                .map(str::to_string);

            operators.push(Operator {
                address: address_field(&entity, "id")?,
                deposit_data_uri: uri,
                deposit_data_index: u64_field(&entity, "depositDataIndex")?,
            });
        }

        Ok(operators)
    }

    /// Whether a deposit for `public_key` already landed on chain.
    pub async fn validator_registered(
        &self,
        public_key: &str,
        block: BlockNumber,
    ) -> Result<bool, Error> {
        let variables = json!({
            "public_key": public_key,
            "block_number": block,
        });

        let data = self
            .query_any(queries::VALIDATOR_REGISTRATION, &variables)
            .await?;
        let registrations = data
            .get("validatorRegistrations")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::parse("response without validatorRegistrations"))?;

        Ok(!registrations.is_empty())
    }

    /// Deposit-contract root observed at `block`, the front-running
    /// interlock carried in the validators vote.
    pub async fn validators_deposit_root(&self, block: BlockNumber) -> Result<B256, Error> {
        let variables = json!({ "block_number": block });

        let data = self
            .query_any(queries::VALIDATORS_DEPOSIT_ROOT, &variables)
            .await?;
        let registration = first(&data, "validatorRegistrations")?;

        str_field(&registration, "validatorsDepositRoot")?
            .parse::<B256>()
            .map_err(Error::parse)
    }

    /// Runs a paginated walk against the first replica that answers.
    async fn paginate_any(
        &self,
        document: &str,
        variables: &Value,
        field: &str,
    ) -> Result<Vec<Value>, Error> {
        let mut last_error = Error::client("no endpoints configured");

        for endpoint in &self.endpoints {
            match self.graph.paginate(endpoint, document, variables, field).await {
                Ok(entities) => return Ok(entities),
                Err(err @ Error::PaginationError(_)) => return Err(err),
                Err(err) => {
                    warn!(%err, %endpoint, "replica endpoint failed");
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    async fn query_any(&self, document: &str, variables: &Value) -> Result<Value, Error> {
        let mut last_error = Error::client("no endpoints configured");

        for endpoint in &self.endpoints {
            match self.graph.query(endpoint, document, variables).await {
                Ok(data) => return Ok(data),
                Err(err) => {
                    warn!(%err, %endpoint, "replica endpoint failed");
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }
}

fn first(data: &Value, field: &str) -> Result<Value, Error> {
    data.get(field)
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .cloned()
        .ok_or_else(|| Error::parse(format!("response without {field}")))
}

fn parse_voting_parameters(data: &Value) -> Result<VotingParameters, Error> {
    let network = first(data, "networks")?;
    let reward_token = first(data, "rewardTokens")?;
    let pool = first(data, "pools")?;

    let rewards = RewardsVotingParameters {
        nonce: u64_field(&network, "oraclesRewardsNonce")?,
        total_rewards: u256_field(&reward_token, "totalRewards")?,
        total_fees: u256_field(&reward_token, "totalFees")?,
        updated_at_timestamp: u64_field(&reward_token, "updatedAtTimestamp")?,
    };

    // absent on a chain that never saw a distributor update
    let distributor = match first(data, "merkleDistributors") {
        Ok(distributor) => DistributorVotingParameters {
            nonce: rewards.nonce,
            from_block: u64_field(&distributor, "rewardsUpdatedAtBlock")?,
            to_block: u64_field(&reward_token, "updatedAtBlock")?,
            last_updated_at_block: u64_field(&distributor, "updatedAtBlock")?,
            last_merkle_root: distributor
                .get("merkleRoot")
                .and_then(Value::as_str)
                .map(|root| root.parse::<B256>().map_err(Error::parse))
                .transpose()?,
            last_merkle_proofs: distributor
                .get("merkleProofs")
                .and_then(Value::as_str)
                .filter(|uri| !uri.is_empty())
                .map(str::to_string),
        },
        Err(_) => DistributorVotingParameters {
            nonce: rewards.nonce,
            from_block: 0,
            to_block: u64_field(&reward_token, "updatedAtBlock")?,
            last_updated_at_block: 0,
            last_merkle_root: None,
            last_merkle_proofs: None,
        },
    };

    let validators = ValidatorsVotingParameters {
        nonce: u64_field(&network, "oraclesValidatorsNonce")?,
        pool_balance: u256_field(&pool, "balance")?,
    };

    Ok(VotingParameters {
        rewards,
        distributor,
        validators,
    })
}

/// Shared accumulation for the two point-weighted engines. Accounts may
/// appear in several positions; their points add up.
fn accumulate_points(
    entities: &[Value],
    principal_field: &str,
    points_field: &str,
    range: &BlockRange,
) -> Result<Balances, Error> {
    let mut points: BTreeMap<Address, U256> = BTreeMap::new();
    let mut total = U256::ZERO;

    for entity in entities {
        let account = address_field(entity, "account")?;
        if account == Address::ZERO {
            continue;
        }

        let principal = u256_field(entity, principal_field)?;
        let mut prev_points = u256_field(entity, points_field)?;
        let mut updated_at = u64_field(entity, "updatedAtBlock")?;

        if updated_at < range.from_block {
            updated_at = range.from_block;
            prev_points = U256::ZERO;
        }

        let elapsed = range.to_block.saturating_sub(updated_at);
        let account_points = prev_points + principal * U256::from(elapsed);
        if account_points.is_zero() {
            continue;
        }

        *points.entry(account).or_default() += account_points;
        total += account_points;
    }

    Ok(Balances {
        total_supply: total,
        balances: points,
    })
}

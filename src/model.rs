//! Data model shared by all oracle components.
//!
//! Glossary:
//!  - `tick`: one iteration of the controller loop, bounded by the
//!    configured process interval.
//!  - `vote`: a signed attestation published to the shared object store,
//!    one per controller kind.
//!  - `fallback address`: the configured sink that receives rewards whose
//!    beneficiary cannot be determined.

use alloy_primitives::{Address, Bytes, B256, U256, U512};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type BlockNumber = u64;
pub type Timestamp = u64;
pub type Amount = U256;

/// 1e18, the number of base units in one display unit.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// 1e9, the number of base units in one gwei.
pub const GWEI: u128 = 1_000_000_000;

/// Effective balance locked per validator, in gwei.
pub const DEPOSIT_GWEI: u64 = 32_000_000_000;

/// Effective balance locked per validator, in base units.
pub fn deposit_amount() -> U256 {
    U256::from(DEPOSIT_GWEI) * U256::from(GWEI)
}

/// `a * b / denominator` with 512-bit widening and truncation toward zero.
///
/// Callers guarantee `b <= denominator`, so the quotient always fits back
/// into 256 bits.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::ZERO;
    }

    let wide = widen(a) * widen(b) / widen(denominator);
    let limbs = wide.as_limbs();
    debug_assert!(limbs[4..].iter().all(|l| *l == 0));

    U256::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3]])
}

fn widen(x: U256) -> U512 {
    let limbs = x.as_limbs();

    U512::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3], 0, 0, 0, 0])
}

/// A finalized block as agreed by the majority of endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
}

/// The block window a tick accounts for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
}

/// Holder balances of a single contract at a fixed block.
///
/// `balances` values may sum below `total_supply` because some holders are
/// filtered out (e.g. the zero address), never above it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Balances {
    pub total_supply: Amount,
    pub balances: BTreeMap<Address, Amount>,
}

impl Balances {
    pub fn insert(&mut self, account: Address, amount: Amount) -> bool {
        if self.balances.insert(account, amount).is_some() {
            return false;
        }

        self.total_supply += amount;
        true
    }
}

/// Accumulated `beneficiary -> token -> amount` allocation.
///
/// The BTreeMap keeps both levels in ascending byte order of the address,
/// which is the canonical ordering everywhere in the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rewards(pub BTreeMap<Address, BTreeMap<Address, Amount>>);

impl Rewards {
    pub fn add(&mut self, to: Address, token: Address, amount: Amount) {
        let entry = self.0.entry(to).or_default().entry(token).or_default();
        *entry += amount;
    }

    pub fn merge(&mut self, other: Rewards) {
        for (account, tokens) in other.0 {
            for (token, amount) in tokens {
                self.add(account, token, amount);
            }
        }
    }

    /// Folds redirected accounts into their targets.
    pub fn redirect(&mut self, redirects: &BTreeMap<Address, Address>) {
        for (from, to) in redirects {
            let Some(tokens) = self.0.remove(from) else {
                continue;
            };

            for (token, amount) in tokens {
                self.add(*to, token, amount);
            }
        }
    }

    pub fn total(&self) -> Amount {
        self.0
            .values()
            .flat_map(|tokens| tokens.values())
            .fold(U256::ZERO, |acc, x| acc + x)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A recognized pool and the strategy used to read holder positions out of
/// it. Any contract not covered by one of these is terminal for the
/// allocator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolKind {
    /// Positions whose tick range straddles the pool's current tick.
    ConcentratedLiquidity { pool: Address },

    /// Positions whose tick range matches the configured bounds exactly.
    ConcentratedLiquidityRange {
        pool: Address,
        tick_lower: i32,
        tick_upper: i32,
    },

    /// LP share of the pool's holdings of one specific token.
    SingleToken { pool: Address, token: Address },

    /// Lending supplier shares weighted by blocks since last update.
    LendingShares { ctoken: Address },

    /// Holder points accrued as principal x blocks held.
    TokenTimeWeighted { token: Address },
}

impl PoolKind {
    pub fn contract(&self) -> Address {
        match self {
            PoolKind::ConcentratedLiquidity { pool } => *pool,
            PoolKind::ConcentratedLiquidityRange { pool, .. } => *pool,
            PoolKind::SingleToken { pool, .. } => *pool,
            PoolKind::LendingShares { ctoken } => *ctoken,
            PoolKind::TokenTimeWeighted { token } => *token,
        }
    }
}

/// One reward budget to allocate, supplied by upstream policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionDescriptor {
    pub contract: Address,
    pub reward: Amount,
    pub reward_token: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardsVotingParameters {
    pub nonce: u64,
    pub total_rewards: Amount,
    pub total_fees: Amount,
    pub updated_at_timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributorVotingParameters {
    pub nonce: u64,
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    pub last_updated_at_block: BlockNumber,
    pub last_merkle_root: Option<B256>,
    pub last_merkle_proofs: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorsVotingParameters {
    pub nonce: u64,
    pub pool_balance: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VotingParameters {
    pub rewards: RewardsVotingParameters,
    pub distributor: DistributorVotingParameters,
    pub validators: ValidatorsVotingParameters,
}

/// Deposit data for one validator key, as stored in the operator's file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositData {
    pub operator: Address,
    pub public_key: Bytes,
    pub withdrawal_credentials: B256,
    pub deposit_data_root: B256,
    pub deposit_data_signature: Bytes,
    #[serde(default)]
    pub proof: Vec<B256>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardsVote {
    pub signature: String,
    pub nonce: u64,
    pub activated_validators: u64,
    pub total_rewards: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributorVote {
    pub signature: String,
    pub nonce: u64,
    pub merkle_root: B256,
    pub merkle_proofs: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorsVote {
    pub signature: String,
    pub nonce: u64,
    pub deposit_data: Vec<DepositData>,
    pub validators_deposit_root: B256,
}

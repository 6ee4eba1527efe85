//! Recursive reward distribution over the recognized pool set.
//!
//! Every honest node must produce this allocation bit-identically: account
//! iteration follows ascending address order, portions use truncating
//! integer division, and the last account absorbs the rounding remainder so
//! the distributed total always equals the input budget.

use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::config::PoolsConfig;
use crate::distributor::engines::PositionSource;
use crate::prelude::*;

pub struct Allocator<'a, S: PositionSource> {
    source: &'a S,
    pools: &'a PoolsConfig,
    range: BlockRange,
}

impl<'a, S: PositionSource> Allocator<'a, S> {
    pub fn new(source: &'a S, pools: &'a PoolsConfig, range: BlockRange) -> Self {
        Self {
            source,
            pools,
            range,
        }
    }

    /// Allocates `reward` of `reward_token` across the holders of
    /// `contract`, recursing through nested recognized contracts.
    pub async fn allocate(
        &self,
        contract: Address,
        reward: U256,
        reward_token: Address,
    ) -> Result<Rewards, Error> {
        if reward.is_zero() {
            return Ok(Rewards::default());
        }

        if self.pools.recognize(&contract).is_none() {
            // unknown allocation target, credit the rescue address
            let mut rewards = Rewards::default();
            rewards.add(self.pools.fallback_address, reward_token, reward);
            return Ok(rewards);
        }

        let visited = BTreeSet::from([contract]);
        self.distribute(contract, reward, reward_token, visited).await
    }

    fn distribute(
        &self,
        contract: Address,
        reward: U256,
        reward_token: Address,
        visited: BTreeSet<Address>,
    ) -> BoxFuture<'_, Result<Rewards, Error>> {
        Box::pin(async move {
            let kind = self
                .pools
                .recognize(&contract)
                .ok_or_else(|| Error::message(format!("{contract} left the recognized set")))?;

            let mut rewards = Rewards::default();

            let holders = self.source.balances(kind, &self.range).await?;
            if holders.total_supply.is_zero() || holders.balances.is_empty() {
                // no recipients, credit the rescue address
                rewards.add(self.pools.fallback_address, reward_token, reward);
                return Ok(rewards);
            }

            let accounts: Vec<Address> = holders.balances.keys().copied().collect();
            let last_index = accounts.len() - 1;
            let mut distributed = U256::ZERO;

            for (i, account) in accounts.iter().enumerate() {
                let account_reward = if i == last_index {
                    reward - distributed
                } else {
                    mul_div(reward, holders.balances[account], holders.total_supply)
                };

                if account_reward.is_zero() {
                    continue;
                }

                if *account == contract || visited.contains(account) {
                    // self-reference or a contract already on this path,
                    // credit the rescue address instead of double counting
                    rewards.add(self.pools.fallback_address, reward_token, account_reward);
                } else if self.pools.recognize(account).is_some() {
                    debug!(parent = %contract, child = %account, "recursing into nested contract");

                    let mut nested_visited = visited.clone();
                    nested_visited.insert(*account);

                    let nested = self
                        .distribute(*account, account_reward, reward_token, nested_visited)
                        .await?;
                    rewards.merge(nested);
                } else {
                    rewards.add(*account, reward_token, account_reward);
                }

                distributed += account_reward;
            }

            Ok(rewards)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct StubSource {
        balances: BTreeMap<Address, Balances>,
    }

    #[async_trait]
    impl PositionSource for StubSource {
        async fn balances(&self, kind: &PoolKind, _range: &BlockRange) -> Result<Balances, Error> {
            self.balances
                .get(&kind.contract())
                .cloned()
                .ok_or_else(|| Error::client("no positions for contract"))
        }
    }

    fn addr(byte: u8) -> Address {
        Address::with_last_byte(byte)
    }

    fn range() -> BlockRange {
        BlockRange {
            from_block: 100,
            to_block: 200,
        }
    }

    fn pools_config(recognized: Vec<PoolKind>) -> PoolsConfig {
        PoolsConfig {
            recognized,
            fallback_address: addr(0xff),
        }
    }

    fn stub(entries: Vec<(Address, Vec<(Address, u64)>)>) -> StubSource {
        let balances = entries
            .into_iter()
            .map(|(contract, holders)| {
                let mut b = Balances::default();
                for (account, amount) in holders {
                    b.insert(account, U256::from(amount));
                }
                (contract, b)
            })
            .collect();

        StubSource { balances }
    }

    fn token_pool(contract: Address) -> PoolKind {
        PoolKind::TokenTimeWeighted { token: contract }
    }

    #[tokio::test]
    async fn equal_holders_with_remainder_to_last() {
        let contract = addr(0xc1);
        let token = addr(0xf1);
        let pools = pools_config(vec![token_pool(contract)]);
        let source = stub(vec![(
            contract,
            vec![(addr(0x0a), 1), (addr(0x0b), 1), (addr(0x0c), 1)],
        )]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(contract, U256::from(1000), token)
            .await
            .unwrap();

        assert_eq!(rewards.0[&addr(0x0a)][&token], U256::from(333));
        assert_eq!(rewards.0[&addr(0x0b)][&token], U256::from(333));
        assert_eq!(rewards.0[&addr(0x0c)][&token], U256::from(334));
        assert_eq!(rewards.total(), U256::from(1000));
    }

    #[tokio::test]
    async fn zero_reward_allocates_nothing() {
        let contract = addr(0xc1);
        let pools = pools_config(vec![token_pool(contract)]);
        let source = stub(vec![]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(contract, U256::ZERO, addr(0xf1))
            .await
            .unwrap();

        assert!(rewards.is_empty());
    }

    #[tokio::test]
    async fn unrecognized_contract_goes_to_fallback() {
        let token = addr(0xf1);
        let pools = pools_config(vec![]);
        let source = stub(vec![]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(addr(0xc1), U256::from(1000), token)
            .await
            .unwrap();

        assert_eq!(rewards.0[&addr(0xff)][&token], U256::from(1000));
        assert_eq!(rewards.total(), U256::from(1000));
    }

    #[tokio::test]
    async fn empty_pool_goes_to_fallback() {
        let contract = addr(0xc1);
        let token = addr(0xf1);
        let pools = pools_config(vec![token_pool(contract)]);
        let source = stub(vec![(contract, vec![])]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(contract, U256::from(1000), token)
            .await
            .unwrap();

        assert_eq!(rewards.0[&addr(0xff)][&token], U256::from(1000));
    }

    #[tokio::test]
    async fn nested_recognized_holder_is_recursed() {
        let parent = addr(0xc1);
        let child = addr(0xc2);
        let token = addr(0xf1);
        let pools = pools_config(vec![token_pool(parent), token_pool(child)]);
        let source = stub(vec![
            (parent, vec![(addr(0x0a), 1), (child, 1)]),
            (child, vec![(addr(0x0b), 1)]),
        ]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(parent, U256::from(1000), token)
            .await
            .unwrap();

        assert_eq!(rewards.0[&addr(0x0a)][&token], U256::from(500));
        assert_eq!(rewards.0[&addr(0x0b)][&token], U256::from(500));
        assert_eq!(rewards.total(), U256::from(1000));
    }

    #[tokio::test]
    async fn child_holding_only_parent_routes_to_fallback() {
        // parent's sole holder is a recognized child whose sole holder is
        // the parent again: the slice must end at the rescue address
        let parent = addr(0xc1);
        let child = addr(0xc2);
        let token = addr(0xf1);
        let pools = pools_config(vec![token_pool(parent), token_pool(child)]);
        let source = stub(vec![
            (parent, vec![(child, 1)]),
            (child, vec![(parent, 1)]),
        ]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(parent, U256::from(1000), token)
            .await
            .unwrap();

        assert_eq!(rewards.0[&addr(0xff)][&token], U256::from(1000));
        assert_eq!(rewards.total(), U256::from(1000));
    }

    #[tokio::test]
    async fn self_referential_holder_routes_to_fallback() {
        let contract = addr(0xc1);
        let token = addr(0xf1);
        let pools = pools_config(vec![token_pool(contract)]);
        let source = stub(vec![(contract, vec![(contract, 1), (addr(0x0a), 1)])]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(contract, U256::from(1000), token)
            .await
            .unwrap();

        // 0x0a sorts before the contract, so the contract absorbs the rest
        assert_eq!(rewards.0[&addr(0x0a)][&token], U256::from(500));
        assert_eq!(rewards.0[&addr(0xff)][&token], U256::from(500));
        assert_eq!(rewards.total(), U256::from(1000));
    }

    #[tokio::test]
    async fn crossing_diamond_routes_revisits_to_fallback() {
        // parent -> {left, right}; left holds right and right holds left.
        // Each branch revisits a contract already on its path, so both
        // slices end at the rescue address and the recursion terminates.
        let parent = addr(0xc1);
        let left = addr(0xc2);
        let right = addr(0xc3);
        let token = addr(0xf1);

        let pools = pools_config(vec![
            token_pool(parent),
            token_pool(left),
            token_pool(right),
        ]);
        let source = stub(vec![
            (parent, vec![(left, 1), (right, 1)]),
            (left, vec![(right, 1)]),
            (right, vec![(left, 1)]),
        ]);

        let allocator = Allocator::new(&source, &pools, range());
        let rewards = allocator
            .allocate(parent, U256::from(1000), token)
            .await
            .unwrap();

        assert_eq!(rewards.0[&addr(0xff)][&token], U256::from(1000));
        assert_eq!(rewards.total(), U256::from(1000));
    }

    #[tokio::test]
    async fn engine_failure_propagates() {
        let contract = addr(0xc1);
        let pools = pools_config(vec![token_pool(contract)]);
        // recognized but no positions configured in the stub
        let source = stub(vec![]);

        let allocator = Allocator::new(&source, &pools, range());
        let result = allocator.allocate(contract, U256::from(1), addr(0xf1)).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn determinism_across_invocations() {
        let contract = addr(0xc1);
        let token = addr(0xf1);
        let pools = pools_config(vec![token_pool(contract)]);
        let source = stub(vec![(
            contract,
            vec![(addr(0x0a), 17), (addr(0x0b), 29), (addr(0x0c), 31)],
        )]);

        let allocator = Allocator::new(&source, &pools, range());
        let first = allocator
            .allocate(contract, U256::from(999_999), token)
            .await
            .unwrap();
        let second = allocator
            .allocate(contract, U256::from(999_999), token)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total(), U256::from(999_999));
    }
}

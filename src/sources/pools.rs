//! AMM subgraph reads backing the concentrated-liquidity engines.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde_json::{json, Value};

use crate::config::GraphConfig;
use crate::prelude::*;
use crate::sources::graph::GraphClient;
use crate::sources::{address_field, i64_field, queries, u256_field};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub owner: Address,
    pub liquidity: U256,
    pub tick_lower: i64,
    pub tick_upper: i64,
}

#[derive(Clone)]
pub struct PoolsSource {
    graph: GraphClient,
    endpoints: Vec<String>,
}

impl PoolsSource {
    pub fn new(graph: GraphClient, config: &GraphConfig) -> Self {
        Self {
            graph,
            endpoints: config.endpoints.clone(),
        }
    }

    /// Liquidity of positions whose tick range straddles the pool's
    /// current tick. An unknown pool or a pool without a tick yields empty
    /// balances.
    pub async fn active_liquidity(
        &self,
        pool: Address,
        block: BlockNumber,
    ) -> Result<Balances, Error> {
        let Some(tick) = self.current_tick(pool, block).await? else {
            return Ok(Balances::default());
        };

        let positions = self.positions(pool, block).await?;
        let active = positions
            .into_iter()
            .filter(|p| p.tick_lower <= tick && tick <= p.tick_upper);

        Ok(aggregate_by_owner(active))
    }

    /// Liquidity of positions whose range matches the bounds exactly.
    /// Used for pools where participation means holding the full range.
    pub async fn range_liquidity(
        &self,
        pool: Address,
        tick_lower: i64,
        tick_upper: i64,
        block: BlockNumber,
    ) -> Result<Balances, Error> {
        let positions = self.positions(pool, block).await?;
        let matching = positions
            .into_iter()
            .filter(|p| p.tick_lower == tick_lower && p.tick_upper == tick_upper);

        Ok(aggregate_by_owner(matching))
    }

    /// Each LP's share of the pool's holdings of one specific token.
    /// Total supply equals the pool's token balance, so rounding dust stays
    /// unallocated rather than invented.
    pub async fn single_token_balances(
        &self,
        pool: Address,
        token: Address,
        block: BlockNumber,
    ) -> Result<Balances, Error> {
        let pool_balance = self.pool_token_balance(pool, token, block).await?;
        if pool_balance.is_zero() {
            return Ok(Balances::default());
        }

        let shares = aggregate_by_owner(self.positions(pool, block).await?.into_iter());
        if shares.total_supply.is_zero() {
            return Ok(Balances::default());
        }

        let balances: BTreeMap<Address, U256> = shares
            .balances
            .iter()
            .map(|(owner, liquidity)| {
                (*owner, mul_div(pool_balance, *liquidity, shares.total_supply))
            })
            .filter(|(_, amount)| !amount.is_zero())
            .collect();

        Ok(Balances {
            total_supply: pool_balance,
            balances,
        })
    }

    async fn current_tick(
        &self,
        pool: Address,
        block: BlockNumber,
    ) -> Result<Option<i64>, Error> {
        let variables = json!({
            "pool_address": format!("{pool:#x}"),
            "block_number": block,
        });

        let data = self
            .graph
            .query(primary(&self.endpoints)?, queries::POOL_TICK, &variables)
            .await?;

        let Some(entity) = data
            .get("pools")
            .and_then(Value::as_array)
            .and_then(|pools| pools.first())
        else {
            return Ok(None);
        };

        match entity.get("tick") {
            Some(Value::Null) | None => Ok(None),
            _ => Ok(Some(i64_field(entity, "tick")?)),
        }
    }

    async fn positions(&self, pool: Address, block: BlockNumber) -> Result<Vec<Position>, Error> {
        let variables = json!({
            "pool_address": format!("{pool:#x}"),
            "block_number": block,
        });

        let entities = self
            .graph
            .paginate(
                primary(&self.endpoints)?,
                queries::POOL_POSITIONS,
                &variables,
                "positions",
            )
            .await?;

        entities
            .iter()
            .map(|entity| {
                Ok(Position {
                    owner: address_field(entity, "owner")?,
                    liquidity: u256_field(entity, "liquidity")?,
                    tick_lower: i64_field(entity, "tickLower")?,
                    tick_upper: i64_field(entity, "tickUpper")?,
                })
            })
            .collect()
    }

    async fn pool_token_balance(
        &self,
        pool: Address,
        token: Address,
        block: BlockNumber,
    ) -> Result<U256, Error> {
        let variables = json!({
            "pool_address": format!("{pool:#x}"),
            "token": format!("{token:#x}"),
            "block_number": block,
        });

        let data = self
            .graph
            .query(
                primary(&self.endpoints)?,
                queries::POOL_TOKEN_BALANCE,
                &variables,
            )
            .await?;

        let Some(entity) = data
            .get("poolTokens")
            .and_then(Value::as_array)
            .and_then(|tokens| tokens.first())
        else {
            return Ok(U256::ZERO);
        };

        u256_field(entity, "amount")
    }
}

fn primary(endpoints: &[String]) -> Result<&str, Error> {
    endpoints
        .first()
        .map(String::as_str)
        .ok_or_else(|| Error::config("no pool subgraph endpoints configured"))
}

/// Sums position liquidity per owner, dropping the zero address and empty
/// positions.
fn aggregate_by_owner(positions: impl Iterator<Item = Position>) -> Balances {
    let mut balances: BTreeMap<Address, U256> = BTreeMap::new();
    let mut total = U256::ZERO;

    for position in positions {
        if position.owner == Address::ZERO || position.liquidity.is_zero() {
            continue;
        }

        *balances.entry(position.owner).or_default() += position.liquidity;
        total += position.liquidity;
    }

    Balances {
        total_supply: total,
        balances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn position(owner: Address, liquidity: u64, lower: i64, upper: i64) -> Position {
        Position {
            owner,
            liquidity: U256::from(liquidity),
            tick_lower: lower,
            tick_upper: upper,
        }
    }

    #[test]
    fn aggregation_sums_per_owner_and_drops_zero_address() {
        let alpha = address!("00000000000000000000000000000000000000a1");

        let balances = aggregate_by_owner(
            vec![
                position(alpha, 10, -100, 100),
                position(alpha, 5, -200, 200),
                position(Address::ZERO, 7, -100, 100),
                position(alpha, 0, -100, 100),
            ]
            .into_iter(),
        );

        assert_eq!(balances.balances[&alpha], U256::from(15));
        assert_eq!(balances.total_supply, U256::from(15));
    }

    #[test]
    fn tick_containment_is_inclusive() {
        let alpha = address!("00000000000000000000000000000000000000a1");
        let tick = 50i64;

        let positions = vec![
            position(alpha, 10, -100, 50),
            position(alpha, 20, 50, 100),
            position(alpha, 40, 51, 100),
        ];

        let active: Vec<_> = positions
            .into_iter()
            .filter(|p| p.tick_lower <= tick && tick <= p.tick_upper)
            .collect();

        let balances = aggregate_by_owner(active.into_iter());
        assert_eq!(balances.balances[&alpha], U256::from(30));
    }
}

//! Position engines: convert a recognized pool's opaque state into holder
//! balances at a fixed block.

use async_trait::async_trait;
use tracing::info;

use crate::prelude::*;
use crate::sources::pools::PoolsSource;
use crate::sources::protocol::ProtocolSource;

/// Seam between the allocator and the upstream position data. One
/// implementation reads subgraphs; tests substitute fixed maps.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn balances(&self, kind: &PoolKind, range: &BlockRange) -> Result<Balances, Error>;
}

pub struct Engines {
    protocol: ProtocolSource,
    pools: PoolsSource,
}

impl Engines {
    pub fn new(protocol: ProtocolSource, pools: PoolsSource) -> Self {
        Self { protocol, pools }
    }
}

#[async_trait]
impl PositionSource for Engines {
    async fn balances(&self, kind: &PoolKind, range: &BlockRange) -> Result<Balances, Error> {
        match kind {
            PoolKind::ConcentratedLiquidity { pool } => {
                info!(%pool, "fetching active liquidity positions");
                self.pools.active_liquidity(*pool, range.to_block).await
            }
            PoolKind::ConcentratedLiquidityRange {
                pool,
                tick_lower,
                tick_upper,
            } => {
                info!(%pool, tick_lower, tick_upper, "fetching range liquidity positions");
                self.pools
                    .range_liquidity(*pool, *tick_lower as i64, *tick_upper as i64, range.to_block)
                    .await
            }
            PoolKind::SingleToken { pool, token } => {
                info!(%pool, %token, "fetching single token balances");
                self.pools
                    .single_token_balances(*pool, *token, range.to_block)
                    .await
            }
            PoolKind::LendingShares { ctoken } => {
                info!(%ctoken, "fetching lending supplier points");
                self.protocol.lending_points(*ctoken, range).await
            }
            PoolKind::TokenTimeWeighted { token } => {
                info!(%token, "fetching token holder points");
                self.protocol.token_points(*token, range).await
            }
        }
    }
}

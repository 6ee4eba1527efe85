//! Rewards controller: attests the pool's total staked rewards and the
//! number of activated validators once per sync period.

use std::time::Duration;

use alloy_primitives::U256;
use chrono::DateTime;
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::prelude::*;
use crate::sources::beacon::{BeaconClient, ValidatorInfo};
use crate::sources::protocol::ProtocolSource;
use crate::vote::VotePublisher;

/// Pause between finality polls while the update epoch finalizes.
const FINALITY_POLL_INTERVAL: Duration = Duration::from_secs(360);

pub struct RewardsController {
    beacon: BeaconClient,
    protocol: ProtocolSource,
    publisher: VotePublisher,
    network: NetworkConfig,
    validators_chunk_size: usize,
    genesis_time: Timestamp,
    cancel: CancelToken,
}

impl RewardsController {
    pub fn new(
        beacon: BeaconClient,
        protocol: ProtocolSource,
        publisher: VotePublisher,
        network: NetworkConfig,
        validators_chunk_size: usize,
        genesis_time: Timestamp,
        cancel: CancelToken,
    ) -> Self {
        Self {
            beacon,
            protocol,
            publisher,
            network,
            validators_chunk_size,
            genesis_time,
            cancel,
        }
    }

    pub async fn process(
        &self,
        params: &RewardsVotingParameters,
        tip: &Block,
    ) -> Result<(), Error> {
        let Some(update_timestamp) = next_update_time(
            params.updated_at_timestamp,
            self.network.sync_period,
            tip.timestamp,
        ) else {
            // too early, or the vote for this period already landed
            return Ok(());
        };

        let update_epoch =
            update_timestamp.saturating_sub(self.genesis_time) / self.network.seconds_per_epoch();

        info!(
            timestamp = update_timestamp,
            epoch = update_epoch,
            "voting for new total rewards"
        );

        // wait out finality of the update epoch before reading balances
        loop {
            let finalized = self.beacon.finalized_epoch().await?;
            if finalized >= update_epoch {
                break;
            }

            info!(epoch = update_epoch, finalized, "waiting for the epoch to finalize");

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(FINALITY_POLL_INTERVAL) => {}
            }
        }

        let public_keys = self.protocol.registered_public_keys(tip.number).await?;
        let state_id = (update_epoch * self.network.slots_per_epoch).to_string();

        let chunks = public_keys
            .chunks(self.validators_chunk_size.max(1))
            .map(|chunk| self.beacon.validators(&state_id, chunk));
        let mut validators = Vec::with_capacity(public_keys.len());
        for chunk in join_all(chunks).await {
            validators.extend(chunk?);
        }

        let tally = tally_validators(&validators, self.network.deposit_token_rate);
        let Some(computed) = tally.total_rewards(params.total_fees) else {
            info!("no staking rewards, waiting for validators to activate");
            return Ok(());
        };

        let total_rewards = match computed {
            Computed::Positive(value) if value >= params.total_rewards => value,
            // rewards went down since the previous update, never mint less
            _ => {
                warn!(
                    current = %self.format_amount(&computed),
                    previous = %format_units(params.total_rewards, &self.network.deposit_token_symbol),
                    "total rewards decreased since the previous update"
                );
                params.total_rewards
            }
        };

        if self.nonce_advanced(params.nonce).await? {
            info!("rewards nonce advanced, abandoning tick");
            return Ok(());
        }

        info!(
            nonce = params.nonce,
            total_rewards = %format_units(total_rewards, &self.network.deposit_token_symbol),
            activated_validators = tally.activated,
            "submitting rewards vote"
        );

        self.publisher
            .submit_rewards(params.nonce, tally.activated, total_rewards)
            .await
    }

    async fn nonce_advanced(&self, nonce: u64) -> Result<bool, Error> {
        let tip = self.protocol.finalized_block().await?;
        let fresh = self.protocol.voting_parameters(tip.number).await?;

        Ok(fresh.rewards.nonce != nonce)
    }

    fn format_amount(&self, computed: &Computed) -> String {
        match computed {
            Computed::Positive(value) => {
                format_units(*value, &self.network.deposit_token_symbol)
            }
            Computed::Negative(value) => format!(
                "-{}",
                format_units(*value, &self.network.deposit_token_symbol)
            ),
        }
    }
}

/// Next scheduled update, advanced by whole sync periods if the clock has
/// already passed one or more of them. `None` while the period is still
/// running.
pub fn next_update_time(last_update: Timestamp, sync_period: u64, now: Timestamp) -> Option<Timestamp> {
    let mut next_update = last_update + sync_period;
    while next_update + sync_period <= now {
        next_update += sync_period;
    }

    if next_update > now {
        if let Some(eta) = DateTime::from_timestamp(next_update as i64, 0) {
            info!(next_update = %eta, "rewards update not due yet");
        }
        return None;
    }

    Some(next_update)
}

/// Signed total expressed as two unsigned accumulators, since alloc math
/// stays in U256 end to end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Computed {
    Positive(U256),
    Negative(U256),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorTally {
    pub activated: u64,
    pub gains: U256,
    pub losses: U256,
}

impl ValidatorTally {
    /// `fees + gains - losses`, or `None` when the pool earned exactly
    /// nothing yet (no point voting before activation).
    pub fn total_rewards(&self, total_fees: U256) -> Option<Computed> {
        let credit = total_fees + self.gains;

        if credit == self.losses {
            return None;
        }

        if credit >= self.losses {
            Some(Computed::Positive(credit - self.losses))
        } else {
            Some(Computed::Negative(self.losses - credit))
        }
    }
}

/// Sums each non-pending validator's balance delta against the deposit
/// amount. On networks with a wrapped deposit token the delta is converted
/// with `delta * WAD / (rate * WAD)`.
pub fn tally_validators(validators: &[ValidatorInfo], rate: Option<u64>) -> ValidatorTally {
    let mut tally = ValidatorTally::default();
    let deposit = deposit_amount();

    for validator in validators {
        if validator.status.is_pending() {
            continue;
        }

        tally.activated += 1;

        let balance = U256::from(validator.balance) * U256::from(GWEI);
        let delta = if balance >= deposit {
            balance - deposit
        } else {
            deposit - balance
        };

        let delta = match rate {
            Some(rate) => {
                let rate = U256::from(rate) * U256::from(WAD);
                mul_div(delta, U256::from(WAD), rate)
            }
            None => delta,
        };

        if balance >= deposit {
            tally.gains += delta;
        } else {
            tally.losses += delta;
        }
    }

    tally
}

/// Renders base units as display units with the token symbol.
pub fn format_units(value: U256, symbol: &str) -> String {
    let wad = U256::from(WAD);
    let whole = value / wad;
    let frac = value % wad;

    if frac.is_zero() {
        return format!("{whole} {symbol}");
    }

    let frac = format!("{frac:0>18}");
    format!("{whole}.{} {symbol}", frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::beacon::ValidatorStatus;

    fn validator(status: ValidatorStatus, balance: u64) -> ValidatorInfo {
        ValidatorInfo { status, balance }
    }

    #[test]
    fn schedule_is_a_noop_before_the_period_ends() {
        assert_eq!(next_update_time(1000, 100, 1099), None);
    }

    #[test]
    fn schedule_fires_at_the_period_boundary() {
        assert_eq!(next_update_time(1000, 100, 1100), Some(1100));
        assert_eq!(next_update_time(1000, 100, 1150), Some(1100));
    }

    #[test]
    fn schedule_advances_by_whole_periods() {
        assert_eq!(next_update_time(1000, 100, 1360), Some(1300));
    }

    #[test]
    fn pending_validators_are_excluded() {
        let validators = vec![
            validator(ValidatorStatus::ActiveOngoing, 32_500_000_000),
            validator(ValidatorStatus::PendingQueued, 32_000_000_000),
            validator(ValidatorStatus::PendingInitialized, 31_000_000_000),
        ];

        let tally = tally_validators(&validators, None);

        assert_eq!(tally.activated, 1);
        assert_eq!(tally.gains, U256::from(500_000_000u64) * U256::from(GWEI));
        assert_eq!(tally.losses, U256::ZERO);
    }

    #[test]
    fn losses_are_tracked_separately() {
        let validators = vec![
            validator(ValidatorStatus::ActiveOngoing, 31_000_000_000),
            validator(ValidatorStatus::ActiveSlashed, 30_000_000_000),
        ];

        let tally = tally_validators(&validators, None);

        assert_eq!(tally.activated, 2);
        assert_eq!(tally.gains, U256::ZERO);
        assert_eq!(tally.losses, U256::from(3_000_000_000u64) * U256::from(GWEI));
    }

    #[test]
    fn wrapped_deposit_rate_is_applied() {
        // 32 mGNO deposit, 1 mGNO of profit converts to 1/32 GNO
        let validators = vec![validator(ValidatorStatus::ActiveOngoing, 33_000_000_000)];

        let tally = tally_validators(&validators, Some(32));

        assert_eq!(tally.gains, U256::from(WAD) / U256::from(32));
    }

    #[test]
    fn computed_rewards_clamp_upward() {
        // beacon reports 31 ETH against a 32 ETH deposit, fees cover 3 ETH:
        // computed 2 ETH, on-chain 5 ETH, the vote keeps 5 ETH
        let validators = vec![validator(ValidatorStatus::ActiveOngoing, 31_000_000_000)];
        let tally = tally_validators(&validators, None);

        let fees = U256::from(3) * U256::from(WAD);
        let computed = tally.total_rewards(fees).unwrap();

        let on_chain = U256::from(5) * U256::from(WAD);
        let voted = match computed {
            Computed::Positive(value) if value >= on_chain => value,
            _ => on_chain,
        };

        assert_eq!(computed, Computed::Positive(U256::from(2) * U256::from(WAD)));
        assert_eq!(voted, on_chain);
    }

    #[test]
    fn loss_epoch_preserves_the_on_chain_value() {
        let validators = vec![validator(ValidatorStatus::ActiveOngoing, 30_000_000_000)];
        let tally = tally_validators(&validators, None);

        let computed = tally.total_rewards(U256::ZERO).unwrap();
        assert_eq!(computed, Computed::Negative(U256::from(2) * U256::from(WAD)));
    }

    #[test]
    fn zero_total_means_no_vote() {
        let validators = vec![validator(ValidatorStatus::ActiveOngoing, 32_000_000_000)];
        let tally = tally_validators(&validators, None);

        assert_eq!(tally.total_rewards(U256::ZERO), None);
    }

    #[test]
    fn units_formatting_trims_trailing_zeros() {
        assert_eq!(format_units(U256::from(WAD), "ETH"), "1 ETH");
        assert_eq!(
            format_units(U256::from(WAD) + U256::from(WAD) / U256::from(2), "GNO"),
            "1.5 GNO"
        );
        assert_eq!(format_units(U256::from(1u64), "ETH"), "0.000000000000000001 ETH");
    }
}

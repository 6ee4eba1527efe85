//! End-to-end allocation scenarios: budget in, claims file out.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use vigil::config::PoolsConfig;
use vigil::distributor::allocator::Allocator;
use vigil::distributor::engines::PositionSource;
use vigil::distributor::merkle::{build_claims, leaf_hash, unclaimed_rewards, verify_proof};
use vigil::prelude::*;

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
        from_block: 1_000,
        to_block: 2_000,
    }
}

fn pools_config(recognized: Vec<Address>) -> PoolsConfig {
    PoolsConfig {
        recognized: recognized
            .into_iter()
            .map(|token| PoolKind::TokenTimeWeighted { token })
            .collect(),
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

#[tokio::test]
async fn direct_payout_commits_to_a_verifiable_root() {
    let contract = addr(0xc1);
    let token = addr(0xf1);
    let pools = pools_config(vec![contract]);
    let source = stub(vec![(
        contract,
        vec![(addr(0x0a), 1), (addr(0x0b), 1), (addr(0x0c), 1)],
    )]);

    let allocator = Allocator::new(&source, &pools, range());
    let rewards = allocator
        .allocate(contract, U256::from(1000), token)
        .await
        .unwrap();

    let (root, claims) = build_claims(&rewards).unwrap();

    // portions follow ascending address order; the last address absorbs
    // the rounding remainder
    for (account, expected) in [(addr(0x0a), "333"), (addr(0x0b), "333"), (addr(0x0c), "334")] {
        let claim = claims.get(&account.to_checksum(None)).unwrap();
        assert_eq!(claim.amounts, vec![expected.to_string()]);
    }

    // every claim must reconstruct the committed root from its own fields
    for (account, claim) in &claims {
        let account: Address = account.parse().unwrap();
        let tokens: Vec<Address> = claim.tokens.iter().map(|t| t.parse().unwrap()).collect();
        let amounts: Vec<U256> = claim
            .amounts
            .iter()
            .map(|a| U256::from_str_radix(a, 10).unwrap())
            .collect();

        let leaf = leaf_hash(claim.index, &tokens, account, &amounts);
        assert!(verify_proof(leaf, &claim.proof, root));
    }
}

#[tokio::test]
async fn empty_pool_pays_the_fallback() {
    let contract = addr(0xc1);
    let token = addr(0xf1);
    let pools = pools_config(vec![contract]);
    let source = stub(vec![(contract, vec![])]);

    let allocator = Allocator::new(&source, &pools, range());
    let rewards = allocator
        .allocate(contract, U256::from(1000), token)
        .await
        .unwrap();

    let (_, claims) = build_claims(&rewards).unwrap();

    let fallback = claims.get(&addr(0xff).to_checksum(None)).unwrap();
    assert_eq!(fallback.amounts, vec!["1000".to_string()]);
}

#[tokio::test]
async fn nested_sole_holder_contract_pays_the_fallback() {
    // the parent's only holder is another recognized contract whose only
    // holder is the parent: both branches bottom out at the rescue address
    let parent = addr(0xc1);
    let child = addr(0xc2);
    let token = addr(0xf1);
    let pools = pools_config(vec![parent, child]);
    let source = stub(vec![(parent, vec![(child, 1)]), (child, vec![(parent, 1)])]);

    let allocator = Allocator::new(&source, &pools, range());
    let rewards = allocator
        .allocate(parent, U256::from(1000), token)
        .await
        .unwrap();

    assert_eq!(rewards.0[&addr(0xff)][&token], U256::from(1000));
    assert_eq!(rewards.total(), U256::from(1000));
}

#[tokio::test]
async fn carry_over_keeps_unclaimed_and_drops_claimed() {
    let contract = addr(0xc1);
    let token = addr(0xf1);
    let alpha = addr(0x0a);
    let beta = addr(0x0b);

    // previous epoch: alpha had 10, beta had 4
    let mut previous_rewards = Rewards::default();
    previous_rewards.add(alpha, token, U256::from(10));
    previous_rewards.add(beta, token, U256::from(4));
    let (_, previous_claims) = build_claims(&previous_rewards).unwrap();

    // alpha redeemed since, beta did not
    let claimed = HashSet::from([alpha]);
    let carried = unclaimed_rewards(&previous_claims, &claimed).unwrap();

    // this epoch allocates 3 to alpha
    let pools = pools_config(vec![contract]);
    let source = stub(vec![(contract, vec![(alpha, 1)])]);
    let allocator = Allocator::new(&source, &pools, range());
    let mut rewards = allocator
        .allocate(contract, U256::from(3), token)
        .await
        .unwrap();

    rewards.merge(carried);

    let (_, claims) = build_claims(&rewards).unwrap();

    let alpha_claim = claims.get(&alpha.to_checksum(None)).unwrap();
    assert_eq!(alpha_claim.amounts, vec!["3".to_string()]);

    let beta_claim = claims.get(&beta.to_checksum(None)).unwrap();
    assert_eq!(beta_claim.amounts, vec!["4".to_string()]);
}

#[tokio::test]
async fn full_pipeline_is_byte_identical_across_runs() {
    let contract = addr(0xc1);
    let nested = addr(0xc2);
    let pools = pools_config(vec![contract, nested]);
    let source = stub(vec![
        (
            contract,
            vec![(addr(0x0a), 17), (addr(0x0b), 29), (nested, 13)],
        ),
        (nested, vec![(addr(0x0c), 3), (addr(0x0d), 5)]),
    ]);

    let descriptors = vec![
        DistributionDescriptor {
            contract,
            reward: U256::from(1_000_000),
            reward_token: addr(0xf1),
        },
        DistributionDescriptor {
            contract,
            reward: U256::from(999),
            reward_token: addr(0xf2),
        },
    ];

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let allocator = Allocator::new(&source, &pools, range());

        let mut rewards = Rewards::default();
        for descriptor in &descriptors {
            let allocation = allocator
                .allocate(descriptor.contract, descriptor.reward, descriptor.reward_token)
                .await
                .unwrap();
            rewards.merge(allocation);
        }

        let redirects = BTreeMap::from([(addr(0x0b), addr(0x0e))]);
        rewards.redirect(&redirects);

        assert_eq!(rewards.total(), U256::from(1_000_999));

        let (root, claims) = build_claims(&rewards).unwrap();
        outputs.push((root, serde_json::to_vec(&claims).unwrap()));
    }

    assert_eq!(outputs[0].0, outputs[1].0);
    assert_eq!(outputs[0].1, outputs[1].1);
}

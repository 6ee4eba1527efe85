//! Deterministic Merkle commitment over the final allocation.
//!
//! Leaves are formed per account in ascending address order. Internal nodes
//! hash the sorted pair `keccak(min(a,b) || max(a,b))`, which makes proofs
//! insensitive to sibling order; an odd node is carried up unchanged.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// One account's entry in the published claims file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claim {
    pub index: u32,
    pub tokens: Vec<String>,
    pub amounts: Vec<String>,
    pub proof: Vec<B256>,
}

/// Checksummed account address -> claim, as uploaded to IPFS.
pub type Claims = BTreeMap<String, Claim>;

pub fn leaf_hash(index: u32, tokens: &[Address], account: Address, amounts: &[U256]) -> B256 {
    let encoded = (U256::from(index), tokens.to_vec(), account, amounts.to_vec());

    keccak256(encoded.abi_encode_params())
}

fn hash_pair(a: B256, b: B256) -> B256 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };

    keccak256([low.as_slice(), high.as_slice()].concat())
}

pub struct MerkleTree {
    levels: Vec<Vec<B256>>,
}

impl MerkleTree {
    pub fn build(leaves: Vec<B256>) -> Result<Self, Error> {
        if leaves.is_empty() {
            return Err(Error::message("merkle tree without leaves"));
        }

        let mut levels = Vec::new();
        let mut current = leaves;

        while current.len() > 1 {
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(*a, *b),
                    [a] => *a,
                    _ => unreachable!(),
                })
                .collect();

            levels.push(current);
            current = next;
        }

        levels.push(current);

        Ok(Self { levels })
    }

    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    /// Bottom-up sibling path for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Vec<B256> {
        let mut proof = Vec::new();
        let mut position = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if let Some(hash) = level.get(sibling) {
                proof.push(*hash);
            }

            position /= 2;
        }

        proof
    }
}

/// Recomputes the root from a leaf and its sibling path.
pub fn verify_proof(leaf: B256, proof: &[B256], root: B256) -> bool {
    proof.iter().fold(leaf, |node, sibling| hash_pair(node, *sibling)) == root
}

/// Forms the leaves from the final allocation and assembles the claims
/// file. Zero amounts are dropped; accounts left without tokens are
/// omitted entirely.
pub fn build_claims(rewards: &Rewards) -> Result<(B256, Claims), Error> {
    let mut entries: Vec<(Address, Vec<Address>, Vec<U256>)> = Vec::new();

    for (account, rewarded) in &rewards.0 {
        let mut tokens = Vec::new();
        let mut amounts = Vec::new();

        // BTreeMap iteration keeps tokens strictly ascending
        for (token, amount) in rewarded {
            if amount.is_zero() {
                continue;
            }

            tokens.push(*token);
            amounts.push(*amount);
        }

        if tokens.is_empty() {
            continue;
        }

        entries.push((*account, tokens, amounts));
    }

    let leaves: Vec<B256> = entries
        .iter()
        .enumerate()
        .map(|(index, (account, tokens, amounts))| {
            leaf_hash(index as u32, tokens, *account, amounts)
        })
        .collect();

    let tree = MerkleTree::build(leaves)?;

    let mut claims = Claims::new();
    for (index, (account, tokens, amounts)) in entries.iter().enumerate() {
        claims.insert(
            account.to_checksum(None),
            Claim {
                index: index as u32,
                tokens: tokens.iter().map(|t| t.to_checksum(None)).collect(),
                amounts: amounts.iter().map(U256::to_string).collect(),
                proof: tree.proof(index),
            },
        );
    }

    Ok((tree.root(), claims))
}

/// Turns the previous epoch's claims file into carry-over rewards, minus
/// the accounts that already redeemed.
pub fn unclaimed_rewards(previous: &Claims, claimed: &HashSet<Address>) -> Result<Rewards, Error> {
    let mut rewards = Rewards::default();

    for (account, claim) in previous {
        let account = account
            .parse::<Address>()
            .map_err(|_| Error::parse(format!("claim account {account}")))?;

        if claimed.contains(&account) {
            continue;
        }

        if claim.tokens.len() != claim.amounts.len() {
            return Err(Error::parse(format!(
                "claim for {account} has mismatched tokens and amounts"
            )));
        }

        for (token, amount) in claim.tokens.iter().zip(&claim.amounts) {
            let token = token
                .parse::<Address>()
                .map_err(|_| Error::parse(format!("claim token {token}")))?;
            let amount = U256::from_str_radix(amount, 10)
                .map_err(|_| Error::parse(format!("claim amount {amount}")))?;

            rewards.add(account, token, amount);
        }
    }

    Ok(rewards)
}

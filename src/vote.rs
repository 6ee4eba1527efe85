//! Vote signing and publication.
//!
//! The aggregator verifies each vote by recovering the signer from an
//! EIP-191 personal-message signature over the keccak digest of the
//! ABI-encoded payload tuple. Payload layouts must match the on-chain
//! verifier exactly.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolValue;
use tracing::info;

use crate::prelude::*;
use crate::sources::store::VoteStore;

pub const REWARD_VOTE_FILENAME: &str = "reward-vote.json";
pub const DISTRIBUTOR_VOTE_FILENAME: &str = "distributor-vote.json";
pub const VALIDATOR_VOTE_FILENAME: &str = "validator-vote.json";

#[derive(Clone)]
pub struct VotePublisher {
    signer: PrivateKeySigner,
    store: VoteStore,
}

impl VotePublisher {
    pub fn new(private_key: &str, store: VoteStore) -> Result<Self, Error> {
        let raw = hex::decode(private_key.trim_start_matches("0x"))
            .map_err(|_| Error::config("oracle private key is not valid hex"))?;
        let signer =
            PrivateKeySigner::from_slice(&raw).map_err(|_| Error::config("invalid oracle key"))?;

        Ok(Self { signer, store })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// `keccak(payload)` wrapped in the EIP-191 envelope, signed into the
    /// 65-byte `r || s || v` form.
    fn sign(&self, encoded_payload: &[u8]) -> Result<String, Error> {
        let candidate_id = keccak256(encoded_payload);
        let signature = self
            .signer
            .sign_message_sync(candidate_id.as_slice())
            .map_err(Error::signing)?;

        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    pub async fn submit_rewards(
        &self,
        nonce: u64,
        activated_validators: u64,
        total_rewards: U256,
    ) -> Result<(), Error> {
        let payload = (
            U256::from(nonce),
            U256::from(activated_validators),
            total_rewards,
        )
            .abi_encode_params();

        let vote = RewardsVote {
            signature: self.sign(&payload)?,
            nonce,
            activated_validators,
            total_rewards: total_rewards.to_string(),
        };

        self.publish(REWARD_VOTE_FILENAME, &vote).await
    }

    pub async fn submit_distributor(
        &self,
        nonce: u64,
        proofs_uri: String,
        merkle_root: B256,
    ) -> Result<(), Error> {
        let payload = (U256::from(nonce), proofs_uri.clone(), merkle_root).abi_encode_params();

        let vote = DistributorVote {
            signature: self.sign(&payload)?,
            nonce,
            merkle_root,
            merkle_proofs: proofs_uri,
        };

        self.publish(DISTRIBUTOR_VOTE_FILENAME, &vote).await
    }

    pub async fn submit_validators(
        &self,
        nonce: u64,
        deposit_data: Vec<DepositData>,
        validators_deposit_root: B256,
    ) -> Result<(), Error> {
        let entries: Vec<(Address, B256, B256, Bytes, Bytes)> = deposit_data
            .iter()
            .map(|d| {
                (
                    d.operator,
                    d.withdrawal_credentials,
                    d.deposit_data_root,
                    d.public_key.clone(),
                    d.deposit_data_signature.clone(),
                )
            })
            .collect();

        let payload = (U256::from(nonce), entries, validators_deposit_root).abi_encode_params();

        let vote = ValidatorsVote {
            signature: self.sign(&payload)?,
            nonce,
            deposit_data,
            validators_deposit_root,
        };

        self.publish(VALIDATOR_VOTE_FILENAME, &vote).await
    }

    async fn publish<V: serde::Serialize>(&self, name: &str, vote: &V) -> Result<(), Error> {
        let oracle = self.address().to_checksum(None);

        self.store.publish(&oracle, name, vote).await?;
        info!(%oracle, vote = name, "vote published");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::eip191_hash_message;

    // throwaway test key
    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn publisher() -> VotePublisher {
        let store = VoteStore::new(&Default::default(), Default::default()).unwrap();

        VotePublisher::new(TEST_KEY, store).unwrap()
    }

    #[test]
    fn signature_is_sixty_five_bytes() {
        let publisher = publisher();

        let payload = (U256::from(1u64), U256::from(2u64), U256::from(3u64)).abi_encode_params();
        let signature = publisher.sign(&payload).unwrap();

        assert!(signature.starts_with("0x"));
        assert_eq!(hex::decode(&signature[2..]).unwrap().len(), 65);
    }

    #[test]
    fn signature_recovers_to_the_oracle_address() {
        let publisher = publisher();

        let payload = (U256::from(7u64), "ipfs://QmTest".to_string(), B256::repeat_byte(0xab))
            .abi_encode_params();
        let signature = publisher.sign(&payload).unwrap();

        let raw = hex::decode(&signature[2..]).unwrap();
        let parsed = alloy_primitives::Signature::try_from(raw.as_slice()).unwrap();

        let digest = eip191_hash_message(keccak256(&payload));
        let recovered = parsed.recover_address_from_prehash(&digest).unwrap();

        assert_eq!(recovered, publisher.address());
    }

    #[test]
    fn rewards_payload_is_three_static_words() {
        let payload = (U256::from(1u64), U256::from(2u64), U256::from(3u64)).abi_encode_params();

        assert_eq!(payload.len(), 96);
        assert_eq!(payload[31], 1);
        assert_eq!(payload[63], 2);
        assert_eq!(payload[95], 3);
    }
}

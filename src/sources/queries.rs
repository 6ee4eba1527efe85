//! GraphQL documents for the protocol and AMM subgraphs.
//!
//! Every paginated document takes a `$last_id` cursor and orders by `id`
//! ascending so pages are stable across replicas.

pub const FINALIZED_BLOCK: &str = r#"
query finalizedBlock($confirmation_blocks: Int) {
  blocks(skip: $confirmation_blocks, first: 1, orderBy: number, orderDirection: desc) {
    id
    timestamp
  }
}
"#;

pub const SYNC_BLOCK: &str = r#"
query syncBlock {
  _meta {
    block {
      number
    }
  }
}
"#;

pub const VOTING_PARAMETERS: &str = r#"
query votingParameters($block_number: Int) {
  networks(first: 1, block: { number: $block_number }) {
    oraclesRewardsNonce
    oraclesValidatorsNonce
  }
  rewardTokens(first: 1, block: { number: $block_number }) {
    totalRewards
    totalFees
    updatedAtBlock
    updatedAtTimestamp
  }
  merkleDistributors(first: 1, block: { number: $block_number }) {
    merkleRoot
    merkleProofs
    updatedAtBlock
    rewardsUpdatedAtBlock
  }
  pools(first: 1, block: { number: $block_number }) {
    balance
  }
}
"#;

pub const ORACLE_MEMBER: &str = r#"
query oracleMember($oracle: ID) {
  oracles(first: 1, where: { id: $oracle }) {
    id
  }
}
"#;

pub const PERIODIC_DISTRIBUTIONS: &str = r#"
query periodicDistributions($from_block: Int, $block_number: Int, $last_id: ID) {
  periodicDistributions(
    first: 1000
    block: { number: $block_number }
    where: { endBlock_gt: $from_block, id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
    token
    beneficiary
    amount
    startBlock
    endBlock
  }
}
"#;

pub const CLAIMED_ACCOUNTS: &str = r#"
query claimedAccounts($from_block: Int, $block_number: Int, $last_id: ID) {
  merkleDistributorClaims(
    first: 1000
    block: { number: $block_number }
    where: { blockNumber_gt: $from_block, id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
    account
  }
}
"#;

pub const DISTRIBUTOR_REDIRECTS: &str = r#"
query distributorRedirects($block_number: Int, $last_id: ID) {
  distributorRedirects(
    first: 1000
    block: { number: $block_number }
    where: { id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
    token {
      id
    }
  }
}
"#;

pub const DISTRIBUTOR_TOKEN_HOLDERS: &str = r#"
query distributorTokenHolders($token_address: String, $block_number: Int, $last_id: ID) {
  distributorTokenHolders(
    first: 1000
    block: { number: $block_number }
    where: { token: $token_address, id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
    account
    amount
    distributorPoints
    updatedAtBlock
  }
}
"#;

pub const LENDING_SUPPLIERS: &str = r#"
query lendingSuppliers($ctoken: String, $block_number: Int, $last_id: ID) {
  lendingPositions(
    first: 1000
    block: { number: $block_number }
    where: { ctoken: $ctoken, id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
    account
    amount
    points
    updatedAtBlock
  }
}
"#;

pub const REGISTERED_VALIDATORS: &str = r#"
query registeredValidators($block_number: Int, $last_id: ID) {
  validators(
    first: 1000
    block: { number: $block_number }
    where: { id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
  }
}
"#;

pub const OPERATORS: &str = r#"
query operators($block_number: Int, $last_id: ID) {
  operators(
    first: 1000
    block: { number: $block_number }
    where: { id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
    depositDataMerkleProofs
    depositDataIndex
  }
}
"#;

pub const VALIDATOR_REGISTRATION: &str = r#"
query validatorRegistration($block_number: Int, $public_key: ID) {
  validatorRegistrations(first: 1, block: { number: $block_number }, where: { publicKey: $public_key }) {
    id
  }
}
"#;

pub const VALIDATORS_DEPOSIT_ROOT: &str = r#"
query validatorsDepositRoot($block_number: Int) {
  validatorRegistrations(first: 1, block: { number: $block_number }, orderBy: createdAtBlock, orderDirection: desc) {
    validatorsDepositRoot
  }
}
"#;

pub const POOL_TICK: &str = r#"
query poolTick($pool_address: ID, $block_number: Int) {
  pools(first: 1, block: { number: $block_number }, where: { id: $pool_address }) {
    tick
  }
}
"#;

pub const POOL_POSITIONS: &str = r#"
query poolPositions($pool_address: String, $block_number: Int, $last_id: ID) {
  positions(
    first: 1000
    block: { number: $block_number }
    where: { pool: $pool_address, liquidity_gt: 0, id_gt: $last_id }
    orderBy: id
    orderDirection: asc
  ) {
    id
    owner
    liquidity
    tickLower
    tickUpper
  }
}
"#;

pub const POOL_TOKEN_BALANCE: &str = r#"
query poolTokenBalance($pool_address: String, $token: String, $block_number: Int) {
  poolTokens(first: 1, block: { number: $block_number }, where: { pool: $pool_address, token: $token }) {
    amount
  }
}
"#;

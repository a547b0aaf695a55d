//! Error types for the Karst consensus core.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown input: {0}")] UnknownInput(String),
    #[error("duplicate input within transaction: {0}")] DuplicateInput(String),
    #[error("insufficient value: have {have}, need {need}")] InsufficientValue { have: String, need: String },
    #[error("bad signature")] BadSignature,
    #[error("input {index} references a transaction older than the relationship window")] StaleInput { index: usize },
    #[error("malformed transaction: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FastGraphError {
    #[error("wrapped transaction invalid: {0}")] BaseInvalid(String),
    #[error("wrapper signature {index} does not verify")] BadWrapperSignature { index: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid version: got {got}, expected {expected}")] InvalidVersion { got: u32, expected: u32 },
    #[error("invalid merkle root")] InvalidMerkleRoot,
    #[error("invalid block hash")] InvalidBlockHash,
    #[error("invalid signature")] InvalidSignature,
    #[error("invalid reward: coinbase {coinbase} != block_reward {reward} + fees {fees}")] InvalidReward { coinbase: String, reward: String, fees: String },
    #[error("no coinbase transaction")] NoCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("orphan block: prev_hash {got} does not match tip {expected}")] OrphanBlock { got: String, expected: String },
    #[error("nonce exceeds maximum length")] NonceTooLong,
    #[error("transaction {index}: {source}")] TransactionError { index: usize, source: TransactionError },
    #[error("double spend: {0}")] DoubleSpend(String),
    #[error("difficulty computation failed: {0}")] DifficultyUnavailable(#[from] DifficultyError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DifficultyError {
    #[error("retarget data missing at height {0}")] RetargetDataMissing(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58check payload")] InvalidEncoding,
    #[error("invalid checksum")] InvalidChecksum,
    #[error("unexpected version byte: {0}")] UnexpectedVersion(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction with this signature already in pool")] AlreadyExists,
    #[error("pool full")] PoolFull,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStoreError {
    #[error("empty chain: no blocks appended")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block at height {0}")] DuplicateBlock(u64),
    #[error("orphan block: prev_hash {got} does not match tip {expected}")] OrphanBlock { got: String, expected: String },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] FastGraph(#[from] FastGraphError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Difficulty(#[from] DifficultyError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] ChainStore(#[from] ChainStoreError),
    #[error("storage: {0}")] Storage(String),
}

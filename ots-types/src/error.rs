//! Error types for OpenTimestamps proof parsing and construction

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Codec ===
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Trailing data: {0} unread bytes after end of proof")]
    TrailingData(usize),

    #[error("Bad magic bytes: expected {expected}, got {actual}")]
    BadMagic { expected: String, actual: String },

    #[error("Length {len} out of bounds [{min}, {max}]")]
    Bounds { len: usize, min: usize, max: usize },

    #[error("Variable-length integer does not fit in 64 bits")]
    VarUintOverflow,

    #[error("Invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),

    // === Operations ===
    #[error("Unknown operation tag 0x{0:02x}")]
    UnknownOp(u8),

    #[error("Message too long: {0} bytes")]
    MessageTooLong(usize),

    #[error("Operation result too long: {0} bytes")]
    ResultTooLong(usize),

    // === Attestations ===
    #[error("Invalid calendar URI: {0:?}")]
    InvalidUri(String),

    #[error("{0} cannot be verified against a block header")]
    NotVerifiable(String),

    #[error("Attested message must be 32 bytes, got {0}")]
    BadAttestedLength(usize),

    #[error("Merkle root mismatch: expected {expected}, block has {actual}")]
    MerkleRootMismatch { expected: String, actual: String },

    // === Timestamp DAG ===
    #[error("An empty timestamp cannot be serialized")]
    EmptyTimestamp,

    #[error("Cannot merge timestamps for different messages: {ours} vs {theirs}")]
    MessageMismatch { ours: String, theirs: String },

    #[error("Timestamp nesting exceeds recursion limit")]
    RecursionLimit,

    #[error("Cannot aggregate zero timestamps")]
    EmptyInput,

    // === Detached files ===
    #[error("Unsupported proof file version {0}")]
    UnsupportedVersion(u64),

    #[error("Invalid digest length: expected {expected}, got {actual}")]
    InvalidDigestLength { expected: usize, actual: usize },

    #[error("Operation {0} is not a digest operation")]
    NotADigestOp(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hex encoding error: {0}")]
    HexEncoding(#[from] hex::FromHexError),
}

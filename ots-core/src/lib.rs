//! Timestamp proofs for OpenTimestamps
//!
//! This crate provides:
//! - The timestamp proof DAG with its canonical encoding and merge
//! - Merkle aggregation of many digests under one tip
//! - Detached `.ots` files
//! - Nonce blinding of file digests
//! - The pure verification reduction

pub mod file;
pub mod merkle;
pub mod nonce;
pub mod timestamp;
pub mod verify;

pub use file::DetachedTimestampFile;
pub use merkle::{cat_sha256, cat_then_op, make_merkle_tree};
pub use nonce::NonceGenerator;
pub use timestamp::Timestamp;
pub use verify::{check_content, evaluate, required_heights, Verification, VerificationError};

//! Core types and wire format for OpenTimestamps proofs
//!
//! This crate defines the byte codec, the commitment operations that label
//! the edges of a proof, and the attestations found at its leaves.

pub mod attestation;
pub mod codec;
pub mod error;
pub mod op;
pub mod primitives;

pub use attestation::Attestation;
pub use codec::{ByteReader, ByteWriter};
pub use error::{Error, Result};
pub use op::{hash_stream, DigestAlg, Op};
pub use primitives::{BlockHeader, Hash256, UnixTime};

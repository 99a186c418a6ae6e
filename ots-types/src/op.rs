//! Commitment operations: the edges of a timestamp proof

use std::fmt;
use std::io::Read;

use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Error, Result};

/// Largest message an operation accepts as input
pub const MAX_MSG_LENGTH: usize = 4096;

/// Largest message an operation may produce
pub const MAX_RESULT_LENGTH: usize = 4096;

const HASH_CHUNK_SIZE: usize = 1024 * 1024;

pub const TAG_SHA1: u8 = 0x02;
pub const TAG_RIPEMD160: u8 = 0x03;
pub const TAG_SHA256: u8 = 0x08;
pub const TAG_APPEND: u8 = 0xf0;
pub const TAG_PREPEND: u8 = 0xf1;
pub const TAG_REVERSE: u8 = 0xf2;
pub const TAG_HEXLIFY: u8 = 0xf3;

/// Hash algorithms usable as digest operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlg {
    Sha1,
    Ripemd160,
    Sha256,
}

impl DigestAlg {
    pub fn tag(self) -> u8 {
        match self {
            DigestAlg::Sha1 => TAG_SHA1,
            DigestAlg::Ripemd160 => TAG_RIPEMD160,
            DigestAlg::Sha256 => TAG_SHA256,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_SHA1 => Some(DigestAlg::Sha1),
            TAG_RIPEMD160 => Some(DigestAlg::Ripemd160),
            TAG_SHA256 => Some(DigestAlg::Sha256),
            _ => None,
        }
    }

    /// Output length in bytes
    pub fn digest_len(self) -> usize {
        match self {
            DigestAlg::Sha1 | DigestAlg::Ripemd160 => 20,
            DigestAlg::Sha256 => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlg::Sha1 => "sha1",
            DigestAlg::Ripemd160 => "ripemd160",
            DigestAlg::Sha256 => "sha256",
        }
    }

    pub fn hash(self, msg: &[u8]) -> Vec<u8> {
        match self {
            DigestAlg::Sha1 => Sha1::digest(msg).to_vec(),
            DigestAlg::Ripemd160 => Ripemd160::digest(msg).to_vec(),
            DigestAlg::Sha256 => Sha256::digest(msg).to_vec(),
        }
    }
}

/// Hash an arbitrary-length stream without buffering it whole
pub fn hash_stream<R: Read>(alg: DigestAlg, reader: R) -> Result<Vec<u8>> {
    match alg {
        DigestAlg::Sha1 => hash_chunks::<Sha1, R>(reader),
        DigestAlg::Ripemd160 => hash_chunks::<Ripemd160, R>(reader),
        DigestAlg::Sha256 => hash_chunks::<Sha256, R>(reader),
    }
}

fn hash_chunks<D: sha2::Digest, R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut chunk = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&chunk[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

/// A pure message transformation
///
/// Equality is by tag and argument, which makes an `Op` usable as the key that
/// identifies an edge in a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    Append(Vec<u8>),
    Prepend(Vec<u8>),
    Reverse,
    /// Carries a tag and a dispatch path but leaves the message untouched.
    /// Existing proofs rely on the identity behaviour, so it is kept as-is.
    Hexlify,
    Digest(DigestAlg),
}

impl Op {
    pub fn sha256() -> Self {
        Op::Digest(DigestAlg::Sha256)
    }

    pub fn tag(&self) -> u8 {
        match self {
            Op::Append(_) => TAG_APPEND,
            Op::Prepend(_) => TAG_PREPEND,
            Op::Reverse => TAG_REVERSE,
            Op::Hexlify => TAG_HEXLIFY,
            Op::Digest(alg) => alg.tag(),
        }
    }

    pub fn is_digest(&self) -> bool {
        matches!(self, Op::Digest(_))
    }

    /// Output length of a digest op, `None` for the others
    pub fn digest_len(&self) -> Option<usize> {
        match self {
            Op::Digest(alg) => Some(alg.digest_len()),
            _ => None,
        }
    }

    /// Apply the operation to a message
    pub fn call(&self, msg: &[u8]) -> Result<Vec<u8>> {
        if msg.len() > MAX_MSG_LENGTH {
            return Err(Error::MessageTooLong(msg.len()));
        }
        let result = match self {
            Op::Append(arg) => [msg, arg.as_slice()].concat(),
            Op::Prepend(arg) => [arg.as_slice(), msg].concat(),
            Op::Reverse => msg.iter().rev().copied().collect(),
            Op::Hexlify => msg.to_vec(),
            Op::Digest(alg) => alg.hash(msg),
        };
        if result.len() > MAX_RESULT_LENGTH {
            return Err(Error::ResultTooLong(result.len()));
        }
        Ok(result)
    }

    pub fn serialize(&self, w: &mut ByteWriter) {
        w.write_byte(self.tag());
        if let Op::Append(arg) | Op::Prepend(arg) = self {
            w.write_varbytes(arg);
        }
    }

    pub fn deserialize(r: &mut ByteReader<'_>) -> Result<Self> {
        let tag = r.read_byte()?;
        Self::deserialize_from_tag(r, tag)
    }

    /// Read the remainder of an operation whose tag was already consumed
    pub fn deserialize_from_tag(r: &mut ByteReader<'_>, tag: u8) -> Result<Self> {
        let op = match tag {
            TAG_SHA1 | TAG_RIPEMD160 | TAG_SHA256 => match DigestAlg::from_tag(tag) {
                Some(alg) => Op::Digest(alg),
                None => return Err(Error::UnknownOp(tag)),
            },
            TAG_APPEND => Op::Append(r.read_varbytes(MAX_RESULT_LENGTH, 1)?.to_vec()),
            TAG_PREPEND => Op::Prepend(r.read_varbytes(MAX_RESULT_LENGTH, 1)?.to_vec()),
            TAG_REVERSE => Op::Reverse,
            TAG_HEXLIFY => Op::Hexlify,
            other => return Err(Error::UnknownOp(other)),
        };
        Ok(op)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Append(arg) => write!(f, "append {}", hex::encode(arg)),
            Op::Prepend(arg) => write!(f, "prepend {}", hex::encode(arg)),
            Op::Reverse => write!(f, "reverse"),
            Op::Hexlify => write!(f, "hexlify"),
            Op::Digest(alg) => write!(f, "{}", alg.name()),
        }
    }
}

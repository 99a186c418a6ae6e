//! Detached timestamp files (`.ots`)
//!
//! A detached file binds the digest of some data, and the algorithm used to
//! compute it, to the proof rooted at that digest.

use std::fmt;
use std::io::Read;

use ots_types::{hash_stream, ByteReader, ByteWriter, DigestAlg, Error, Op, Result};

use crate::timestamp::Timestamp;

/// Header every detached timestamp file starts with
pub const MAGIC: &[u8; 31] = b"\x00OpenTimestamps\x00\x00Proof\x00\xbf\x89\xe2\xe8\x84\xe8\x92\x94";

/// The only major version this crate reads and writes
pub const MAJOR_VERSION: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetachedTimestampFile {
    hash_op: Op,
    timestamp: Timestamp,
}

impl DetachedTimestampFile {
    /// Wrap an existing proof whose root message is a digest under `hash_op`
    pub fn new(hash_op: Op, timestamp: Timestamp) -> Result<Self> {
        let expected = match hash_op.digest_len() {
            Some(len) => len,
            None => return Err(Error::NotADigestOp(hash_op.to_string())),
        };
        let actual = timestamp.msg().len();
        if actual != expected {
            return Err(Error::InvalidDigestLength { expected, actual });
        }
        Ok(Self { hash_op, timestamp })
    }

    /// A fresh file with a bare root node for `digest`
    pub fn from_digest(hash_op: Op, digest: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new(hash_op, Timestamp::new(digest))
    }

    /// Hash `reader` to the end and wrap the digest
    pub fn from_stream<R: Read>(alg: DigestAlg, reader: R) -> Result<Self> {
        let digest = hash_stream(alg, reader)?;
        Self::from_digest(Op::Digest(alg), digest)
    }

    pub fn hash_op(&self) -> &Op {
        &self.hash_op
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    /// The file digest, which is also the root message of the proof
    pub fn digest(&self) -> Vec<u8> {
        self.timestamp.msg()
    }

    pub fn serialize(&self, w: &mut ByteWriter) -> Result<()> {
        w.write_bytes(MAGIC);
        w.write_varuint(MAJOR_VERSION);
        self.hash_op.serialize(w);
        w.write_bytes(&self.timestamp.msg());
        self.timestamp.serialize(w)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.serialize(&mut w)?;
        Ok(w.into_bytes())
    }

    pub fn deserialize(r: &mut ByteReader<'_>) -> Result<Self> {
        r.assert_magic(MAGIC)?;

        let version = r.read_varuint()?;
        if version != MAJOR_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let hash_op = Op::deserialize(r)?;
        let digest_len = match hash_op.digest_len() {
            Some(len) => len,
            None => return Err(Error::NotADigestOp(hash_op.to_string())),
        };
        let digest = r.read_bytes(digest_len)?.to_vec();
        let timestamp = Timestamp::deserialize(r, digest)?;

        Ok(Self { hash_op, timestamp })
    }

    /// Parse a complete file, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let file = Self::deserialize(&mut r)?;
        r.assert_eof()?;
        Ok(file)
    }
}

impl fmt::Display for DetachedTimestampFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File {} hash: {}", self.hash_op, hex::encode(self.digest()))?;
        writeln!(f, "Timestamp:")?;
        write!(f, "{}", self.timestamp.str_tree())
    }
}

//! Attestations: the leaves of a timestamp proof

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Error, Result};
use crate::primitives::{BlockHeader, UnixTime};

pub const TAG_SIZE: usize = 8;

/// Largest serialized attestation payload accepted
pub const MAX_PAYLOAD_SIZE: usize = 8192;

pub const MAX_URI_LENGTH: usize = 1000;

pub const PENDING_TAG: [u8; TAG_SIZE] = [0x83, 0xdf, 0xe3, 0x0d, 0x2e, 0xf9, 0x0c, 0x8e];
pub const BITCOIN_TAG: [u8; TAG_SIZE] = [0x05, 0x88, 0x96, 0x0d, 0x73, 0xd7, 0x19, 0x01];

fn is_allowed_uri_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'/' | b':')
}

fn validate_uri(uri: &[u8]) -> Result<()> {
    if uri.len() > MAX_URI_LENGTH || !uri.iter().copied().all(is_allowed_uri_char) {
        return Err(Error::InvalidUri(String::from_utf8_lossy(uri).into_owned()));
    }
    Ok(())
}

/// A claim that a message existed no later than some external event
///
/// Equality, hashing and ordering all follow the serialized tag and payload,
/// so an `Unknown` carrying a known tag is the same attestation as its
/// parsed form.
#[derive(Debug, Clone)]
pub enum Attestation {
    /// A calendar has promised to attest the message later
    Pending { uri: String },
    /// The message is the (byte-reversed) merkle root of the block at `height`
    Bitcoin { height: u64 },
    /// An attestation type this implementation does not understand
    Unknown { tag: [u8; TAG_SIZE], payload: Vec<u8> },
}

impl Attestation {
    /// Build a pending attestation, rejecting URIs that would not survive a round trip
    pub fn pending(uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        validate_uri(uri.as_bytes())?;
        Ok(Attestation::Pending { uri })
    }

    pub fn tag(&self) -> [u8; TAG_SIZE] {
        match self {
            Attestation::Pending { .. } => PENDING_TAG,
            Attestation::Bitcoin { .. } => BITCOIN_TAG,
            Attestation::Unknown { tag, .. } => *tag,
        }
    }

    /// The payload bytes, without the outer length prefix
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Attestation::Pending { uri } => {
                let mut w = ByteWriter::with_capacity(uri.len() + 2);
                w.write_varbytes(uri.as_bytes());
                w.into_bytes()
            }
            Attestation::Bitcoin { height } => {
                let mut w = ByteWriter::with_capacity(5);
                w.write_varuint(*height);
                w.into_bytes()
            }
            Attestation::Unknown { payload, .. } => payload.clone(),
        }
    }

    /// Fails for a pending URI that the parser would reject
    pub fn serialize(&self, w: &mut ByteWriter) -> Result<()> {
        if let Attestation::Pending { uri } = self {
            validate_uri(uri.as_bytes())?;
        }
        w.write_bytes(&self.tag());
        w.write_varbytes(&self.payload());
        Ok(())
    }

    pub fn deserialize(r: &mut ByteReader<'_>) -> Result<Self> {
        let tag = r.read_bytes(TAG_SIZE)?;
        let payload = r.read_varbytes(MAX_PAYLOAD_SIZE, 0)?;
        let mut inner = ByteReader::new(payload);

        let attestation = if tag == PENDING_TAG {
            let uri = inner.read_varbytes(MAX_URI_LENGTH, 0)?;
            validate_uri(uri)?;
            Attestation::Pending {
                uri: String::from_utf8_lossy(uri).into_owned(),
            }
        } else if tag == BITCOIN_TAG {
            Attestation::Bitcoin {
                height: inner.read_varuint()?,
            }
        } else {
            let mut unknown_tag = [0u8; TAG_SIZE];
            unknown_tag.copy_from_slice(tag);
            return Ok(Attestation::Unknown {
                tag: unknown_tag,
                payload: payload.to_vec(),
            });
        };

        inner.assert_eof()?;
        Ok(attestation)
    }

    pub fn is_bitcoin(&self) -> bool {
        matches!(self, Attestation::Bitcoin { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Attestation::Pending { .. })
    }

    /// Check a Bitcoin attestation of `msg` against the header of its block
    ///
    /// Returns the block time on success.
    pub fn verify_against_block(&self, msg: &[u8], header: &BlockHeader) -> Result<UnixTime> {
        if !self.is_bitcoin() {
            return Err(Error::NotVerifiable(self.to_string()));
        }
        if msg.len() != 32 {
            return Err(Error::BadAttestedLength(msg.len()));
        }
        let reversed: Vec<u8> = msg.iter().rev().copied().collect();
        if reversed.as_slice() != header.merkle_root.as_bytes() {
            return Err(Error::MerkleRootMismatch {
                expected: hex::encode(&reversed),
                actual: header.merkle_root.to_hex(),
            });
        }
        Ok(header.time)
    }
}

impl PartialEq for Attestation {
    fn eq(&self, other: &Self) -> bool {
        self.tag() == other.tag() && self.payload() == other.payload()
    }
}

impl Eq for Attestation {}

impl Hash for Attestation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        self.payload().hash(state);
    }
}

// Canonical order: serialized tag, then serialized payload
impl Ord for Attestation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag()
            .cmp(&other.tag())
            .then_with(|| self.payload().cmp(&other.payload()))
    }
}

impl PartialOrd for Attestation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Attestation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attestation::Pending { uri } => write!(f, "PendingAttestation('{}')", uri),
            Attestation::Bitcoin { height } => write!(f, "BitcoinBlockHeaderAttestation({})", height),
            Attestation::Unknown { tag, payload } => write!(
                f,
                "UnknownAttestation({}, {})",
                hex::encode(tag),
                hex::encode(payload)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Hash256;

    fn serialize(a: &Attestation) -> Vec<u8> {
        let mut w = ByteWriter::new();
        a.serialize(&mut w).unwrap();
        w.into_bytes()
    }

    fn deserialize(bytes: &[u8]) -> Result<Attestation> {
        let mut r = ByteReader::new(bytes);
        let a = Attestation::deserialize(&mut r)?;
        r.assert_eof()?;
        Ok(a)
    }

    #[test]
    fn test_pending_wire_format() {
        let a = Attestation::pending("foobar").unwrap();
        assert_eq!(
            hex::encode(serialize(&a)),
            format!("83dfe30d2ef90c8e0706{}", hex::encode("foobar"))
        );
        assert_eq!(deserialize(&serialize(&a)).unwrap(), a);
    }

    #[test]
    fn test_bitcoin_wire_format() {
        let a = Attestation::Bitcoin { height: 358391 };
        let bytes = serialize(&a);
        assert_eq!(hex::encode(&bytes), "0588960d73d7190103f7ef15");
        assert_eq!(deserialize(&bytes).unwrap(), a);
    }

    #[test]
    fn test_unknown_roundtrips_verbatim() {
        let mut bytes = hex::decode("0102030405060708").unwrap();
        bytes.extend_from_slice(&[0x04, 0xde, 0xad, 0xbe, 0xef]);
        let a = deserialize(&bytes).unwrap();
        assert_eq!(
            a,
            Attestation::Unknown {
                tag: [1, 2, 3, 4, 5, 6, 7, 8],
                payload: vec![0xde, 0xad, 0xbe, 0xef],
            }
        );
        assert_eq!(serialize(&a), bytes);
    }

    #[test]
    fn test_invalid_uri_rejected() {
        assert!(matches!(
            Attestation::pending("https://exa mple.com"),
            Err(Error::InvalidUri(_))
        ));
        assert!(Attestation::pending("x".repeat(MAX_URI_LENGTH + 1)).is_err());

        let mut w = ByteWriter::new();
        w.write_bytes(&PENDING_TAG);
        w.write_varbytes(&[0x05, b'a', b'b', b'?', b'c', b'd']);
        assert!(matches!(deserialize(w.as_bytes()), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn test_serialize_rejects_unparseable_uri() {
        let a = Attestation::Pending {
            uri: "https://exa mple.com".to_string(),
        };
        let mut w = ByteWriter::new();
        assert!(matches!(a.serialize(&mut w), Err(Error::InvalidUri(_))));
        assert!(w.as_bytes().is_empty());
    }

    #[test]
    fn test_equality_follows_encoding() {
        let pending = Attestation::pending("foobar").unwrap();
        let disguised = Attestation::Unknown {
            tag: PENDING_TAG,
            payload: pending.payload(),
        };
        assert_eq!(disguised, pending);
        assert_eq!(disguised.cmp(&pending), Ordering::Equal);

        let set: std::collections::BTreeSet<_> = [pending.clone(), disguised.clone()].into_iter().collect();
        assert_eq!(set.len(), 1);
        let hashed: std::collections::HashSet<_> = [pending, disguised].into_iter().collect();
        assert_eq!(hashed.len(), 1);

        assert_ne!(
            Attestation::Bitcoin { height: 1 },
            Attestation::Unknown { tag: BITCOIN_TAG, payload: vec![0x02] }
        );
    }

    #[test]
    fn test_trailing_payload_rejected() {
        let mut w = ByteWriter::new();
        w.write_bytes(&BITCOIN_TAG);
        w.write_varbytes(&[0x01, 0x00]);
        assert!(matches!(deserialize(w.as_bytes()), Err(Error::TrailingData(1))));
    }

    #[test]
    fn test_ordering_by_tag_then_payload() {
        let bitcoin = Attestation::Bitcoin { height: 5 };
        let pending = Attestation::pending("a").unwrap();
        let unknown = Attestation::Unknown { tag: [0xff; 8], payload: vec![] };
        assert!(bitcoin < pending);
        assert!(pending < unknown);

        let a = Attestation::pending("https://a").unwrap();
        let b = Attestation::pending("https://b").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_verify_against_block() {
        let msg: Vec<u8> = (0u8..32).collect();
        let mut root = msg.clone();
        root.reverse();
        let header = BlockHeader {
            merkle_root: Hash256::from_slice(&root).unwrap(),
            time: UnixTime(1_500_000_000),
        };
        let a = Attestation::Bitcoin { height: 1 };
        assert_eq!(a.verify_against_block(&msg, &header).unwrap(), UnixTime(1_500_000_000));

        assert!(matches!(
            a.verify_against_block(&root, &header),
            Err(Error::MerkleRootMismatch { .. })
        ));
        assert!(matches!(
            a.verify_against_block(&msg[..20], &header),
            Err(Error::BadAttestedLength(20))
        ));
        assert!(matches!(
            Attestation::pending("x").unwrap().verify_against_block(&msg, &header),
            Err(Error::NotVerifiable(_))
        ));
    }
}

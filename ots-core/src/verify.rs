//! Timestamp proof verification
//!
//! Resolving block headers is I/O and lives with the caller. This module is
//! the pure half: given the headers the caller managed to resolve, it decides
//! what the proof establishes.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use ots_types::{Attestation, BlockHeader, UnixTime};

use crate::file::DetachedTimestampFile;

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("File digest {actual} does not match the proof digest {expected}")]
    ContentMismatch { expected: String, actual: String },

    #[error("Proof carries no attestation that could be verified")]
    NoAttestation,
}

/// What a proof establishes once verification has run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The data existed no later than `time`, the time of block `height`
    Confirmed { height: u64, time: UnixTime },
    /// No Bitcoin attestation verified yet, but these calendars promised one
    Pending { uris: Vec<String> },
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Confirmed { height, time } => {
                write!(f, "Success! Bitcoin block {} attests existence as of {}", height, time)
            }
            Verification::Pending { uris } => {
                write!(f, "Pending confirmation in Bitcoin blockchain")?;
                for uri in uris {
                    write!(f, "\n  {}", uri)?;
                }
                Ok(())
            }
        }
    }
}

/// Heights of every Bitcoin attestation in the proof, lowest first
pub fn required_heights(file: &DetachedTimestampFile) -> BTreeSet<u64> {
    file.timestamp()
        .all_attestations()
        .filter_map(|(_, attestation)| match attestation {
            Attestation::Bitcoin { height } => Some(height),
            _ => None,
        })
        .collect()
}

/// Require that the proof was made for data hashing to `expected_digest`
pub fn check_content(
    file: &DetachedTimestampFile,
    expected_digest: &[u8],
) -> Result<(), VerificationError> {
    let digest = file.digest();
    if digest != expected_digest {
        return Err(VerificationError::ContentMismatch {
            expected: hex::encode(&digest),
            actual: hex::encode(expected_digest),
        });
    }
    Ok(())
}

/// Decide what `file` proves about data whose digest is `expected_digest`
///
/// `headers` holds the block headers the caller resolved, keyed by height.
/// When several Bitcoin attestations verify, the lowest height wins since it
/// proves the earliest existence.
pub fn evaluate(
    file: &DetachedTimestampFile,
    expected_digest: &[u8],
    headers: &HashMap<u64, BlockHeader>,
) -> Result<Verification, VerificationError> {
    check_content(file, expected_digest)?;

    let mut best: Option<(u64, UnixTime)> = None;
    let mut pending = Vec::new();

    for (msg, attestation) in file.timestamp().all_attestations() {
        match &attestation {
            Attestation::Bitcoin { height } => {
                let outcome = match headers.get(height) {
                    Some(header) => attestation
                        .verify_against_block(&msg, header)
                        .map_err(|e| e.to_string()),
                    None => Err("block header unavailable".to_string()),
                };
                match outcome {
                    Ok(time) => {
                        debug!(height, %time, "Bitcoin attestation verified");
                        if best.map_or(true, |(h, _)| *height < h) {
                            best = Some((*height, time));
                        }
                    }
                    Err(reason) => {
                        warn!(height, %reason, "Bitcoin attestation did not verify");
                    }
                }
            }
            Attestation::Pending { uri } => {
                if !pending.contains(uri) {
                    pending.push(uri.clone());
                }
            }
            Attestation::Unknown { .. } => {
                debug!(%attestation, "Skipping unknown attestation");
            }
        }
    }

    if let Some((height, time)) = best {
        return Ok(Verification::Confirmed { height, time });
    }
    if !pending.is_empty() {
        return Ok(Verification::Pending { uris: pending });
    }
    Err(VerificationError::NoAttestation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;
    use ots_types::{Hash256, Op};

    fn header_for(msg: &[u8], time: u64) -> BlockHeader {
        let mut root = [0u8; 32];
        root.copy_from_slice(msg);
        root.reverse();
        BlockHeader {
            merkle_root: Hash256::new(root),
            time: UnixTime(time),
        }
    }

    fn file_with_digest(digest: &[u8]) -> DetachedTimestampFile {
        DetachedTimestampFile::from_digest(Op::sha256(), digest.to_vec()).unwrap()
    }

    /// Attach a Bitcoin attestation on a fresh branch and return the attested message
    fn attest_branch(root: &Timestamp, nonce: u8, height: u64) -> Vec<u8> {
        let node = root.add(Op::Append(vec![nonce])).unwrap().add(Op::sha256()).unwrap();
        node.add_attestation(Attestation::Bitcoin { height });
        node.msg()
    }

    #[test]
    fn test_content_mismatch_is_checked_first() {
        let file = file_with_digest(&[1u8; 32]);
        attest_branch(file.timestamp(), 0, 100);

        let result = evaluate(&file, &[2u8; 32], &HashMap::new());
        assert!(matches!(result, Err(VerificationError::ContentMismatch { .. })));
    }

    #[test]
    fn test_lowest_confirmed_height_wins() {
        let digest = [7u8; 32];
        let file = file_with_digest(&digest);
        let root = file.timestamp();

        let good_high = attest_branch(root, 1, 523367);
        attest_branch(root, 2, 523367);
        attest_branch(root, 3, 523367);
        let good_low = attest_branch(root, 4, 523364);

        let mut headers = HashMap::new();
        headers.insert(523367, header_for(&good_high, 1_526_000_000));
        headers.insert(523364, header_for(&good_low, 1_525_990_000));

        let result = evaluate(&file, &digest, &headers).unwrap();
        assert_eq!(
            result,
            Verification::Confirmed {
                height: 523364,
                time: UnixTime(1_525_990_000),
            }
        );
    }

    #[test]
    fn test_pending_only() {
        let digest = [3u8; 32];
        let file = file_with_digest(&digest);
        let leaf = file.timestamp().add(Op::sha256()).unwrap();
        leaf.add_attestation(Attestation::pending("https://alice.btc.calendar.opentimestamps.org").unwrap());
        leaf.add_attestation(Attestation::pending("https://bob.btc.calendar.opentimestamps.org").unwrap());

        match evaluate(&file, &digest, &HashMap::new()).unwrap() {
            Verification::Pending { uris } => assert_eq!(uris.len(), 2),
            other => panic!("expected pending, got {:?}", other),
        }
    }

    #[test]
    fn test_pending_beats_failed_attestation() {
        let digest = [4u8; 32];
        let file = file_with_digest(&digest);
        attest_branch(file.timestamp(), 0, 10);
        file.timestamp()
            .add_attestation(Attestation::pending("https://calendar.example").unwrap());

        let result = evaluate(&file, &digest, &HashMap::new()).unwrap();
        assert!(matches!(result, Verification::Pending { .. }));
    }

    #[test]
    fn test_failed_attestation_is_no_attestation() {
        let digest = [5u8; 32];
        let file = file_with_digest(&digest);
        attest_branch(file.timestamp(), 0, 42);

        let mut headers = HashMap::new();
        headers.insert(42, header_for(&[9u8; 32], 0));

        assert!(matches!(
            evaluate(&file, &digest, &headers),
            Err(VerificationError::NoAttestation)
        ));
    }

    #[test]
    fn test_unresolved_header_is_no_attestation() {
        let digest = [5u8; 32];
        let file = file_with_digest(&digest);
        attest_branch(file.timestamp(), 0, 42);

        assert!(matches!(
            evaluate(&file, &digest, &HashMap::new()),
            Err(VerificationError::NoAttestation)
        ));
    }

    #[test]
    fn test_no_attestation() {
        let digest = [6u8; 32];
        let file = file_with_digest(&digest);
        file.timestamp().add_attestation(Attestation::Unknown {
            tag: [1, 2, 3, 4, 5, 6, 7, 8],
            payload: vec![],
        });

        assert!(matches!(
            evaluate(&file, &digest, &HashMap::new()),
            Err(VerificationError::NoAttestation)
        ));
    }

    #[test]
    fn test_required_heights() {
        let file = file_with_digest(&[8u8; 32]);
        attest_branch(file.timestamp(), 0, 300);
        attest_branch(file.timestamp(), 1, 200);
        attest_branch(file.timestamp(), 2, 300);

        let heights: Vec<u64> = required_heights(&file).into_iter().collect();
        assert_eq!(heights, vec![200, 300]);
    }
}

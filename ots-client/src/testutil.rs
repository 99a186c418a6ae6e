//! In-process collaborators for tests and benches
//!
//! These stand in for calendars, explorers and a Bitcoin node without any
//! network access. Calendars keep proofs as serialized bytes so they can be
//! shared across threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use ots_core::Timestamp;
use ots_types::{Attestation, BlockHeader, Hash256, Op, UnixTime};

use crate::calendar::Calendar;
use crate::explorer::BlockExplorer;
use crate::node::BitcoinNode;
use crate::{ClientError, Result};

/// A calendar that answers submissions with a pending attestation and can
/// later be told to confirm everything it received
pub struct MockCalendar {
    url: String,
    /// Remaining submissions that fail before the calendar starts answering
    failures_left: AtomicUsize,
    always_fail: bool,
    /// Commitment → serialized proof rooted at it
    proofs: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    submissions: AtomicUsize,
    lookups: AtomicUsize,
}

impl MockCalendar {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            failures_left: AtomicUsize::new(0),
            always_fail: false,
            proofs: Mutex::new(HashMap::new()),
            submissions: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    /// A calendar that never answers
    pub fn failing(url: impl Into<String>) -> Self {
        Self {
            always_fail: true,
            ..Self::new(url)
        }
    }

    /// A calendar whose first `failures` submissions fail
    pub fn flaky(url: impl Into<String>, failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::new(url)
        }
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Commitments this calendar promised to anchor
    pub fn commitments(&self) -> Vec<Vec<u8>> {
        self.lock_proofs().keys().cloned().collect()
    }

    /// Anchor every commitment in block `height` and return the attested
    /// message of each
    pub fn confirm_all(&self, height: u64) -> Result<Vec<Vec<u8>>> {
        let mut proofs = self.lock_proofs();
        let mut attested = Vec::new();
        for (commitment, proof) in proofs.iter_mut() {
            let timestamp = Timestamp::new(commitment.clone());
            let anchored = timestamp
                .add(Op::Prepend(b"block".to_vec()))?
                .add(Op::sha256())?;
            anchored.add_attestation(Attestation::Bitcoin { height });
            attested.push(anchored.msg());
            *proof = timestamp.to_bytes()?;
        }
        Ok(attested)
    }

    fn lock_proofs(&self) -> std::sync::MutexGuard<'_, HashMap<Vec<u8>, Vec<u8>>> {
        self.proofs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Calendar for MockCalendar {
    fn url(&self) -> &str {
        &self.url
    }

    async fn submit(&self, digest: &[u8]) -> Result<Timestamp> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(ClientError::Network(format!("{} is down", self.url)));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::Network(format!("{} dropped the connection", self.url)));
        }

        let timestamp = Timestamp::new(digest.to_vec());
        let commitment = timestamp
            .add(Op::Append(self.url.as_bytes().to_vec()))?
            .add(Op::sha256())?;
        commitment.add_attestation(Attestation::pending(self.url.clone())?);

        let pending = Timestamp::new(commitment.msg());
        pending.add_attestation(Attestation::pending(self.url.clone())?);
        self.lock_proofs()
            .insert(commitment.msg(), pending.to_bytes()?);

        Ok(timestamp)
    }

    async fn get_timestamp(&self, commitment: &[u8]) -> Result<Timestamp> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(ClientError::Network(format!("{} is down", self.url)));
        }
        let proof = self.lock_proofs().get(commitment).cloned();
        match proof {
            Some(bytes) => Ok(Timestamp::from_bytes(&bytes, commitment.to_vec())?),
            None => Err(ClientError::BadStatus {
                url: format!("{}/timestamp/{}", self.url, hex::encode(commitment)),
                status: 404,
            }),
        }
    }
}

/// Header whose merkle root commits to `msg`, as a Bitcoin attestation of
/// `msg` requires
pub fn header_for(msg: &[u8], time: u64) -> Result<BlockHeader> {
    let mut root = Hash256::from_slice(msg)?.as_bytes().to_owned();
    root.reverse();
    Ok(BlockHeader {
        merkle_root: Hash256::new(root),
        time: UnixTime(time),
    })
}

/// An explorer with a fixed view of the chain
#[derive(Default)]
pub struct MockExplorer {
    name: String,
    hashes: HashMap<u64, Hash256>,
    headers: HashMap<Hash256, BlockHeader>,
    calls: AtomicUsize,
}

impl MockExplorer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_block(mut self, height: u64, hash: Hash256, header: BlockHeader) -> Self {
        self.hashes.insert(height, hash);
        self.headers.insert(hash, header);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockExplorer for MockExplorer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn block_hash(&self, height: u64) -> Result<Hash256> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hashes
            .get(&height)
            .copied()
            .ok_or_else(|| ClientError::Network(format!("{} has no block at {}", self.name, height)))
    }

    async fn block_header(&self, hash: &Hash256) -> Result<BlockHeader> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.headers
            .get(hash)
            .copied()
            .ok_or_else(|| ClientError::Network(format!("{} has no block {}", self.name, hash)))
    }
}

/// A node with a fixed view of the chain, or one that is unreachable
#[derive(Default)]
pub struct MockNode {
    headers: HashMap<u64, BlockHeader>,
    calls: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, height: u64, header: BlockHeader) -> Self {
        self.headers.insert(height, header);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BitcoinNode for MockNode {
    async fn block_header(&self, height: u64) -> Result<BlockHeader> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.headers
            .get(&height)
            .copied()
            .ok_or_else(|| ClientError::Network(format!("node has no block at {}", height)))
    }
}

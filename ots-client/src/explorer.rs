//! Block explorers and the quorum that corroborates them
//!
//! A single explorer is never trusted on its own: block hashes and headers
//! are only accepted once enough independent explorers return identical
//! answers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

use ots_types::{BlockHeader, Hash256, UnixTime};

use crate::{check_status, send_error, ClientError, Result};

/// Explorers that must agree before an answer is accepted
pub const DEFAULT_MIN_AGREEMENT: usize = 2;

#[async_trait]
pub trait BlockExplorer: Send + Sync {
    fn name(&self) -> &str;

    /// Hash of the block at `height`, in display byte order
    async fn block_hash(&self, height: u64) -> Result<Hash256>;

    async fn block_header(&self, hash: &Hash256) -> Result<BlockHeader>;
}

/// Explorer speaking the Esplora REST API
#[derive(Debug, Clone)]
pub struct EsploraExplorer {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EsploraBlock {
    merkle_root: Hash256,
    timestamp: u64,
}

impl EsploraExplorer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ots-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }
}

#[async_trait]
impl BlockExplorer for EsploraExplorer {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn block_hash(&self, height: u64) -> Result<Hash256> {
        let resp = self
            .http
            .get(format!("{}/block-height/{}", self.base_url, height))
            .send()
            .await
            .map_err(send_error)?;
        let text = check_status(resp)?.text().await.map_err(send_error)?;
        Ok(Hash256::from_hex(&text)?)
    }

    async fn block_header(&self, hash: &Hash256) -> Result<BlockHeader> {
        let resp = self
            .http
            .get(format!("{}/block/{}", self.base_url, hash))
            .send()
            .await
            .map_err(send_error)?;
        let block: EsploraBlock = check_status(resp)?.json().await.map_err(send_error)?;
        Ok(BlockHeader {
            merkle_root: block.merkle_root,
            time: UnixTime(block.timestamp),
        })
    }
}

/// Pick the single answer at least `min_agreement` explorers returned
///
/// Failed requests are dropped. Two different answers both reaching the
/// threshold count as disagreement.
fn tally<T: PartialEq + std::fmt::Debug>(
    what: &str,
    answers: Vec<(String, Result<T>)>,
    min_agreement: usize,
) -> Result<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for (name, answer) in answers {
        match answer {
            Ok(value) => match counts.iter_mut().find(|(v, _)| *v == value) {
                Some((_, count)) => *count += 1,
                None => counts.push((value, 1)),
            },
            Err(e) => warn!(explorer = %name, error = %e, "Explorer failed to answer {}", what),
        }
    }

    if counts.len() > 1 {
        warn!(?counts, "Explorers disagree on {}", what);
    }

    let mut agreed = counts.into_iter().filter(|(_, count)| *count >= min_agreement);
    match (agreed.next(), agreed.next()) {
        (Some((value, count)), None) => {
            debug!(count, "Explorers agree on {}", what);
            Ok(value)
        }
        (Some(_), Some(_)) => Err(ClientError::NoQuorum(format!(
            "conflicting answers for {}",
            what
        ))),
        (None, _) => Err(ClientError::NoQuorum(format!(
            "fewer than {} explorers agree on {}",
            min_agreement, what
        ))),
    }
}

/// A set of explorers queried concurrently and cross-checked
#[derive(Clone)]
pub struct ExplorerQuorum {
    explorers: Vec<Arc<dyn BlockExplorer>>,
    min_agreement: usize,
}

impl ExplorerQuorum {
    pub fn new(explorers: Vec<Arc<dyn BlockExplorer>>) -> Self {
        Self {
            explorers,
            min_agreement: DEFAULT_MIN_AGREEMENT,
        }
    }

    pub fn with_min_agreement(mut self, min_agreement: usize) -> Self {
        self.min_agreement = min_agreement.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.explorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.explorers.is_empty()
    }

    pub async fn block_hash(&self, height: u64) -> Result<Hash256> {
        let answers = join_all(self.explorers.iter().map(|explorer| async move {
            (explorer.name().to_string(), explorer.block_hash(height).await)
        }))
        .await;
        tally(&format!("block hash at height {}", height), answers, self.min_agreement)
    }

    pub async fn block_header(&self, hash: &Hash256) -> Result<BlockHeader> {
        let answers = join_all(self.explorers.iter().map(|explorer| async move {
            (explorer.name().to_string(), explorer.block_header(hash).await)
        }))
        .await;
        tally(&format!("header of block {}", hash), answers, self.min_agreement)
    }

    /// Header of the block at `height`, both lookups corroborated
    pub async fn header_at(&self, height: u64) -> Result<BlockHeader> {
        let hash = self.block_hash(height).await?;
        self.block_header(&hash).await
    }
}

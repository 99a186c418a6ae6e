//! Client orchestrating calendars, explorers and the proof logic

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use ots_core::{
    check_content, evaluate, make_merkle_tree, required_heights, DetachedTimestampFile,
    NonceGenerator, Timestamp, Verification,
};
use ots_types::{Attestation, BlockHeader};

use crate::calendar::{Calendar, HttpCalendar, UrlWhitelist};
use crate::config::ClientConfig;
use crate::explorer::{BlockExplorer, EsploraExplorer, ExplorerQuorum};
use crate::node::{BitcoinNode, RpcNode};
use crate::{ClientError, Result};

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial backoff duration before first retry
    pub initial_backoff: Duration,
    /// Maximum backoff duration (caps exponential growth)
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff duration for a given attempt (0-indexed)
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        // Add jitter: random value in [0.5 * capped, 1.0 * capped]
        let jitter = 0.5 + rand::random::<f64>() * 0.5;
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Client for stamping, upgrading and verifying timestamp proofs
pub struct OtsClient {
    /// Calendars new digests are submitted to
    calendars: Vec<Arc<dyn Calendar>>,
    /// Calendar instances reused when a pending attestation names their URL
    known_calendars: HashMap<String, Arc<dyn Calendar>>,
    /// When set, upgrades ask these calendars instead of the attested ones
    calendar_override: Vec<Arc<dyn Calendar>>,
    min_calendar_responses: usize,
    whitelist: UrlWhitelist,
    explorers: ExplorerQuorum,
    node: Option<Arc<dyn BitcoinNode>>,
    /// Shared pool for calendars discovered during upgrade
    http: reqwest::Client,
    /// Retry configuration (None = no retries)
    retry_config: Option<RetryConfig>,
}

impl OtsClient {
    /// Build a client talking to the collaborators named in `config`
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("ots-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let calendars: Vec<Arc<dyn Calendar>> = config
            .calendars
            .iter()
            .map(|url| Arc::new(HttpCalendar::with_client(url.as_str(), http.clone())) as Arc<dyn Calendar>)
            .collect();

        let explorers: Vec<Arc<dyn BlockExplorer>> = config
            .explorers
            .iter()
            .map(|url| Arc::new(EsploraExplorer::with_client(url.as_str(), http.clone())) as Arc<dyn BlockExplorer>)
            .collect();

        let node = match &config.bitcoin_node {
            Some(node) => Some(Arc::new(RpcNode::new(
                node.url.clone(),
                node.user.clone(),
                node.password.clone(),
                config.timeout(),
            )?) as Arc<dyn BitcoinNode>),
            None => None,
        };

        let client = Self {
            calendars: Vec::new(),
            known_calendars: HashMap::new(),
            calendar_override: Vec::new(),
            min_calendar_responses: config.min_calendar_responses,
            whitelist: UrlWhitelist::new(&config.whitelist)?,
            explorers: ExplorerQuorum::new(explorers),
            node,
            http,
            retry_config: Some(RetryConfig::from(&config.retry)),
        };
        Ok(client.with_calendars(calendars))
    }

    /// Replace the submission calendars
    pub fn with_calendars(mut self, calendars: Vec<Arc<dyn Calendar>>) -> Self {
        for calendar in &calendars {
            self.known_calendars
                .insert(calendar.url().to_string(), calendar.clone());
        }
        self.calendars = calendars;
        self
    }

    /// Make `calendar` reachable when a pending attestation names its URL
    pub fn with_known_calendar(mut self, calendar: Arc<dyn Calendar>) -> Self {
        self.known_calendars
            .insert(calendar.url().to_string(), calendar);
        self
    }

    /// Ask these calendars during upgrade, whatever the attestations say
    pub fn with_calendar_override(mut self, calendars: Vec<Arc<dyn Calendar>>) -> Self {
        self.calendar_override = calendars;
        self
    }

    pub fn with_min_calendar_responses(mut self, min: usize) -> Self {
        self.min_calendar_responses = min;
        self
    }

    pub fn with_whitelist(mut self, whitelist: UrlWhitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn with_explorers(mut self, explorers: ExplorerQuorum) -> Self {
        self.explorers = explorers;
        self
    }

    pub fn with_node(mut self, node: Option<Arc<dyn BitcoinNode>>) -> Self {
        self.node = node;
        self
    }

    /// Enable retry with the given configuration
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.retry_config = None;
        self
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out
    async fn with_retries<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self
            .retry_config
            .as_ref()
            .map(|c| c.max_retries + 1)
            .unwrap_or(1);

        let mut last_err = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                if let Some(retry) = &self.retry_config {
                    let backoff = retry.backoff_for_attempt(attempt - 1);
                    warn!(
                        "Retry attempt {}/{} for {} after {:?}",
                        attempt,
                        max_attempts - 1,
                        label,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !is_retryable(&e) || attempt + 1 >= max_attempts {
                        return Err(e);
                    }
                    warn!("Retryable error on attempt {} for {}: {}", attempt + 1, label, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(ClientError::Network("No attempts made".to_string())))
    }

    /// Timestamp `files` together under one merkle tip
    ///
    /// Each file's proof gains its nonce, its path to the tip, and whatever
    /// the calendars answered. Returns the number of calendars that answered.
    pub async fn stamp(&self, files: &[DetachedTimestampFile]) -> Result<usize> {
        let mut nonces = NonceGenerator::new();
        let leaves = files
            .iter()
            .map(|file| nonces.blind(file.timestamp()))
            .collect::<ots_types::Result<Vec<_>>>()?;
        let tip = make_merkle_tree(&leaves)?;
        let digest = tip.msg();

        info!(
            files = files.len(),
            tip = %hex::encode(&digest),
            calendars = self.calendars.len(),
            "Submitting merkle tip"
        );

        let results = join_all(self.calendars.iter().map(|calendar| {
            let digest = &digest;
            self.with_retries(calendar.url(), move || calendar.submit(digest))
        }))
        .await;

        let mut answered = 0;
        for (calendar, result) in self.calendars.iter().zip(results) {
            match result.and_then(|answer| Ok(tip.merge(&answer)?)) {
                Ok(()) => {
                    debug!(calendar = calendar.url(), "Calendar accepted submission");
                    answered += 1;
                }
                Err(e) => warn!(calendar = calendar.url(), error = %e, "Calendar submission failed"),
            }
        }

        let required = self.min_calendar_responses.min(self.calendars.len()).max(1);
        if answered < required {
            return Err(ClientError::Network(format!(
                "only {} of {} calendars answered, {} required",
                answered,
                self.calendars.len(),
                required
            )));
        }

        info!(answered, "Timestamp submitted");
        Ok(answered)
    }

    /// Calendars to ask about a pending attestation naming `uri`
    fn calendars_for(&self, uri: &str) -> Vec<Arc<dyn Calendar>> {
        if !self.calendar_override.is_empty() {
            return self.calendar_override.clone();
        }
        if !self.whitelist.contains(uri) {
            warn!(uri, "Ignoring attestation from calendar outside the whitelist");
            return Vec::new();
        }
        match self.known_calendars.get(uri.trim_end_matches('/')) {
            Some(calendar) => vec![calendar.clone()],
            None => vec![Arc::new(HttpCalendar::with_client(uri, self.http.clone()))],
        }
    }

    /// Follow every pending attestation and merge what the calendars know
    ///
    /// Individual calendar failures are logged and skipped. Returns whether
    /// the proof gained any attestation.
    pub async fn upgrade(&self, file: &DetachedTimestampFile) -> Result<bool> {
        let root = file.timestamp();
        if root.is_complete() {
            debug!("Timestamp already complete");
            return Ok(false);
        }

        let existing: BTreeSet<Attestation> =
            root.all_attestations().map(|(_, attestation)| attestation).collect();

        let mut requests: Vec<(Timestamp, Vec<u8>, Arc<dyn Calendar>)> = Vec::new();
        let mut seen = HashSet::new();
        for node in root.directly_verified() {
            let commitment = node.msg();
            for attestation in node.attestations() {
                let Attestation::Pending { uri } = attestation else {
                    continue;
                };
                for calendar in self.calendars_for(&uri) {
                    if seen.insert((commitment.clone(), calendar.url().to_string())) {
                        requests.push((node.clone(), commitment.clone(), calendar));
                    }
                }
            }
        }

        let results = join_all(requests.iter().map(|(_, commitment, calendar)| {
            self.with_retries(calendar.url(), move || calendar.get_timestamp(commitment))
        }))
        .await;

        let mut changed = false;
        for ((node, commitment, calendar), result) in requests.iter().zip(results) {
            let upgraded = match result {
                Ok(upgraded) => upgraded,
                Err(ClientError::BadStatus { status: 404, .. }) => {
                    info!(
                        calendar = calendar.url(),
                        commitment = %hex::encode(commitment),
                        "Calendar has not anchored this commitment yet"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(calendar = calendar.url(), error = %e, "Calendar lookup failed");
                    continue;
                }
            };

            let new_attestations = upgraded
                .all_attestations()
                .filter(|(_, attestation)| !existing.contains(attestation))
                .count();
            if new_attestations == 0 {
                debug!(calendar = calendar.url(), "No new attestations");
                continue;
            }

            match node.merge(&upgraded) {
                Ok(()) => {
                    info!(calendar = calendar.url(), new_attestations, "Got new attestations");
                    changed = true;
                }
                Err(e) => warn!(calendar = calendar.url(), error = %e, "Could not merge upgraded proof"),
            }
        }

        Ok(changed)
    }

    /// Header of the block at `height`, from the node if possible, else from
    /// the explorer quorum
    pub async fn block_header(&self, height: u64) -> Result<BlockHeader> {
        if let Some(node) = &self.node {
            match node.block_header(height).await {
                Ok(header) => return Ok(header),
                Err(e) => warn!(height, error = %e, "Bitcoin node lookup failed, falling back to explorers"),
            }
        }
        if self.explorers.is_empty() {
            return Err(ClientError::NoQuorum("no block explorers configured".to_string()));
        }
        self.explorers.header_at(height).await
    }

    /// Verify `file` against data whose digest is `expected_digest`
    pub async fn verify(
        &self,
        file: &DetachedTimestampFile,
        expected_digest: &[u8],
    ) -> Result<Verification> {
        check_content(file, expected_digest)?;

        let heights = required_heights(file);
        let lookups = join_all(
            heights
                .iter()
                .map(|&height| async move { (height, self.block_header(height).await) }),
        )
        .await;

        let mut headers = HashMap::new();
        for (height, lookup) in lookups {
            match lookup {
                Ok(header) => {
                    headers.insert(height, header);
                }
                Err(e) => warn!(height, error = %e, "Could not resolve block header"),
            }
        }

        Ok(evaluate(file, expected_digest, &headers)?)
    }
}

/// Determine if an error is retryable (transient network issues)
fn is_retryable(err: &ClientError) -> bool {
    match err {
        ClientError::Network(_) | ClientError::Timeout | ClientError::Http(_) => true,
        ClientError::BadStatus { status, .. } => *status >= 500,
        ClientError::NoQuorum(_)
        | ClientError::Proof(_)
        | ClientError::Verification(_)
        | ClientError::Storage(_)
        | ClientError::Config(_) => false,
    }
}

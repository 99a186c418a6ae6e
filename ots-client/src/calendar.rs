//! Calendar servers: submission of digests and retrieval of upgraded proofs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use tracing::debug;
use url::Url;

use ots_core::Timestamp;

use crate::{check_status, send_error, ClientError, Result};

/// Media type calendars answer with
pub const OTS_MEDIA_TYPE: &str = "application/vnd.opentimestamps.v1";

/// Largest proof fragment accepted from a calendar
pub const MAX_RESPONSE_SIZE: usize = 10_000;

/// A calendar server
///
/// Both calls return a proof rooted at the message they were given.
#[async_trait]
pub trait Calendar: Send + Sync {
    fn url(&self) -> &str;

    /// Submit a digest; the answer is usually a single pending attestation
    async fn submit(&self, digest: &[u8]) -> Result<Timestamp>;

    /// Fetch everything the calendar currently knows about `commitment`
    async fn get_timestamp(&self, commitment: &[u8]) -> Result<Timestamp>;
}

/// Calendar reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpCalendar {
    url: String,
    http: reqwest::Client,
}

impl HttpCalendar {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ots-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(url, http))
    }

    /// Share an existing connection pool
    pub fn with_client(url: impl Into<String>, http: reqwest::Client) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self { url, http }
    }

    async fn read_proof(&self, resp: reqwest::Response) -> Result<Vec<u8>> {
        let body = check_status(resp)?.bytes().await.map_err(send_error)?;
        if body.len() > MAX_RESPONSE_SIZE {
            return Err(ClientError::Network(format!(
                "{} sent a {} byte proof, limit is {}",
                self.url,
                body.len(),
                MAX_RESPONSE_SIZE
            )));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Calendar for HttpCalendar {
    fn url(&self) -> &str {
        &self.url
    }

    async fn submit(&self, digest: &[u8]) -> Result<Timestamp> {
        debug!(calendar = %self.url, digest = %hex::encode(digest), "Submitting digest");

        let resp = self
            .http
            .post(format!("{}/digest", self.url))
            .header(ACCEPT, OTS_MEDIA_TYPE)
            .body(digest.to_vec())
            .send()
            .await
            .map_err(send_error)?;
        let body = self.read_proof(resp).await?;

        Ok(Timestamp::from_bytes(&body, digest.to_vec())?)
    }

    async fn get_timestamp(&self, commitment: &[u8]) -> Result<Timestamp> {
        let commitment_hex = hex::encode(commitment);
        debug!(calendar = %self.url, commitment = %commitment_hex, "Requesting timestamp");

        let resp = self
            .http
            .get(format!("{}/timestamp/{}", self.url, commitment_hex))
            .header(ACCEPT, OTS_MEDIA_TYPE)
            .send()
            .await
            .map_err(send_error)?;
        let body = self.read_proof(resp).await?;

        Ok(Timestamp::from_bytes(&body, commitment.to_vec())?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// `*.suffix`: one or more leading labels
    Subdomain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UrlPattern {
    scheme: String,
    host: HostPattern,
    port: Option<u16>,
}

impl UrlPattern {
    fn parse(pattern: &str) -> Result<Self> {
        let invalid = || ClientError::Config(format!("invalid calendar pattern {:?}", pattern));

        let (scheme, rest) = pattern.split_once("://").ok_or_else(invalid)?;
        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().map_err(|_| invalid())?)),
            None => (authority, None),
        };
        if scheme.is_empty() || host.is_empty() {
            return Err(invalid());
        }

        let host = host.to_ascii_lowercase();
        let host = match host.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() => HostPattern::Subdomain(suffix.to_string()),
            Some(_) => return Err(invalid()),
            None => HostPattern::Exact(host),
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host,
            port,
        })
    }

    fn matches(&self, url: &Url) -> bool {
        if url.scheme() != self.scheme || url.port() != self.port {
            return false;
        }
        let host = match url.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => return false,
        };
        match &self.host {
            HostPattern::Exact(expected) => host == *expected,
            HostPattern::Subdomain(suffix) => host
                .strip_suffix(suffix.as_str())
                .and_then(|prefix| prefix.strip_suffix('.'))
                .map_or(false, |labels| labels.split('.').all(|label| !label.is_empty())),
        }
    }
}

/// Calendars the upgrader may contact when following pending attestations
#[derive(Debug, Clone, Default)]
pub struct UrlWhitelist {
    patterns: Vec<UrlPattern>,
}

impl UrlWhitelist {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| UrlPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn contains(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => self.patterns.iter().any(|p| p.matches(&parsed)),
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_whitelist() -> UrlWhitelist {
        UrlWhitelist::new([
            "https://*.calendar.opentimestamps.org",
            "https://*.calendar.eternitywall.com",
            "https://*.calendar.catallaxy.com",
        ])
        .unwrap()
    }

    #[test]
    fn test_whitelist_accepts_subdomains() {
        let whitelist = default_whitelist();
        assert!(whitelist.contains("https://alice.btc.calendar.opentimestamps.org"));
        assert!(whitelist.contains("https://finney.calendar.eternitywall.com"));
        assert!(whitelist.contains("https://bob.btc.calendar.opentimestamps.org/"));
        assert!(whitelist.contains("https://a.b.btc.calendar.opentimestamps.org"));
    }

    #[test]
    fn test_whitelist_rejects_others() {
        let whitelist = default_whitelist();
        assert!(!whitelist.contains("https://calendar.opentimestamps.org"));
        assert!(!whitelist.contains("http://alice.btc.calendar.opentimestamps.org"));
        assert!(!whitelist.contains("https://evil-calendar.opentimestamps.org"));
        assert!(!whitelist.contains("https://alice.btc.calendar.opentimestamps.org:8443"));
        assert!(!whitelist.contains("not a url"));
    }

    #[test]
    fn test_whitelist_exact_host_and_port() {
        let whitelist = UrlWhitelist::new(["http://127.0.0.1:14788"]).unwrap();
        assert!(whitelist.contains("http://127.0.0.1:14788"));
        assert!(!whitelist.contains("http://127.0.0.1:14789"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(UrlWhitelist::new(["calendar.example.com"]).is_err());
        assert!(UrlWhitelist::new(["https://*."]).is_err());
        assert!(UrlWhitelist::new(["https://host:notaport"]).is_err());
    }

    proptest! {
        #[test]
        fn prop_whitelist_never_panics(url in ".{0,64}") {
            let _ = default_whitelist().contains(&url);
        }

        #[test]
        fn prop_whitelist_accepts_any_subdomain(labels in prop::collection::vec("[a-z0-9]{1,12}", 1..4)) {
            let url = format!("https://{}.calendar.opentimestamps.org", labels.join("."));
            prop_assert!(default_whitelist().contains(&url));
        }
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let calendar = HttpCalendar::with_client("https://a.pool.opentimestamps.org/", reqwest::Client::new());
        assert_eq!(calendar.url(), "https://a.pool.opentimestamps.org");
    }
}

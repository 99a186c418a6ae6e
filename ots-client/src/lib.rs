//! OpenTimestamps Client Library
//!
//! Talks to calendar servers, block explorers and an optional local Bitcoin
//! node on behalf of the pure proof logic in `ots-core`.

pub mod calendar;
pub mod client;
pub mod config;
pub mod explorer;
pub mod node;
pub mod storage;
pub mod testutil;

pub use calendar::{Calendar, HttpCalendar, UrlWhitelist};
pub use client::{OtsClient, RetryConfig};
pub use config::ClientConfig;
pub use explorer::{BlockExplorer, EsploraExplorer, ExplorerQuorum};
pub use node::{BitcoinNode, RpcNode};
pub use storage::ProofStorage;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Timeout")]
    Timeout,

    #[error("No quorum: {0}")]
    NoQuorum(String),

    #[error("Invalid proof: {0}")]
    Proof(#[from] ots_types::Error),

    #[error("Verification failed: {0}")]
    Verification(#[from] ots_core::VerificationError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Map a failed reqwest send, keeping timeouts distinguishable
pub(crate) fn send_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Http(err)
    }
}

/// Fail on any non-success status, keeping the URL for the log
pub(crate) fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ClientError::BadStatus {
            url: resp.url().to_string(),
            status: status.as_u16(),
        })
    }
}

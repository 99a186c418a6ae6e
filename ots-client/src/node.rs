//! Local Bitcoin node over JSON-RPC

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use ots_types::{BlockHeader, Hash256, UnixTime};

use crate::{check_status, send_error, ClientError, Result};

/// A Bitcoin node trusted to report block headers without corroboration
#[async_trait]
pub trait BitcoinNode: Send + Sync {
    async fn block_header(&self, height: u64) -> Result<BlockHeader>;
}

/// Bitcoin Core style JSON-RPC endpoint
#[derive(Debug, Clone)]
pub struct RpcNode {
    url: String,
    user: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcHeader {
    merkleroot: Hash256,
    time: u64,
}

impl RpcNode {
    pub fn new(
        url: impl Into<String>,
        user: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            user,
            password,
            http,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        debug!(node = %self.url, method, "RPC call");

        let mut request = self.http.post(&self.url).json(&json!({
            "jsonrpc": "1.0",
            "id": "ots",
            "method": method,
            "params": params,
        }));
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let resp = request.send().await.map_err(send_error)?;
        let body: RpcResponse<T> = check_status(resp)?.json().await.map_err(send_error)?;

        match (body.result, body.error) {
            (_, Some(err)) => Err(ClientError::Network(format!(
                "{} failed with RPC error {}: {}",
                method, err.code, err.message
            ))),
            (Some(result), None) => Ok(result),
            (None, None) => Err(ClientError::Network(format!("{} returned no result", method))),
        }
    }
}

#[async_trait]
impl BitcoinNode for RpcNode {
    async fn block_header(&self, height: u64) -> Result<BlockHeader> {
        let hash: String = self.call("getblockhash", json!([height])).await?;
        let header: RpcHeader = self.call("getblockheader", json!([hash])).await?;
        Ok(BlockHeader {
            merkle_root: header.merkleroot,
            time: UnixTime(header.time),
        })
    }
}

mod types;

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::RpcSettings;
use crate::error::{Error, Result};

pub use types::{ChainInfo, RawBlock, Verbosity};
use types::{RpcErrorPayload, RpcRequest, RpcResponse};

/// The node calls the indexer depends on.
pub trait ChainSource {
    async fn get_chain_info(&self) -> Result<ChainInfo>;

    async fn get_block_hash(&self, height: u64) -> Result<String>;

    async fn get_block(&self, hash: &str, verbosity: Verbosity) -> Result<RawBlock>;
}

/// JSON-RPC client for bitcoind.
#[derive(Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    user: Option<String>,
    password: Option<String>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(settings: &RpcSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: settings.url.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let request = RpcRequest {
            version: "1.0",
            id: id.clone(),
            method,
            params,
        };

        debug!(method, id = %id, "rpc request");

        let mut builder = self.http.post(&self.url).json(&request);
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_ref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{method}: {e}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("{method}: failed to read response: {e}")))?;

        let result = parse_response(method, &id, status, &body)?;
        serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("{method}: unexpected result shape: {e}")))
    }
}

impl ChainSource for RpcClient {
    async fn get_chain_info(&self) -> Result<ChainInfo> {
        self.call("getblockchaininfo", vec![]).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String> {
        self.call("getblockhash", vec![json!(height)]).await
    }

    async fn get_block(&self, hash: &str, verbosity: Verbosity) -> Result<RawBlock> {
        let value: Value = self
            .call("getblock", vec![json!(hash), json!(verbosity as u8)])
            .await?;
        if !value.is_object() {
            return Err(Error::Protocol(format!(
                "getblock: expected an object at verbosity {}",
                verbosity as u8
            )));
        }
        Ok(RawBlock(value))
    }
}

/// Classifies a JSON-RPC reply.
///
/// A populated `error` always wins, whatever the HTTP status says. A body that is not an
/// envelope at all is a transport failure when the status is an error (proxies, auth,
/// overloaded work queue) and a protocol failure otherwise.
fn parse_response(method: &str, id: &str, status: StatusCode, body: &[u8]) -> Result<Value> {
    let response: RpcResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(_) if !status.is_success() => {
            return Err(Error::Transport(format!("{method}: HTTP {status}")));
        }
        Err(e) => {
            return Err(Error::Protocol(format!("{method}: malformed response: {e}")));
        }
    };

    if let Some(error) = response.error {
        let message = match serde_json::from_value::<RpcErrorPayload>(error.clone()) {
            Ok(payload) => format!("{method}: node error {}: {}", payload.code, payload.message),
            Err(_) => format!("{method}: node error {error}"),
        };
        return Err(Error::Remote(message));
    }

    if response.id.as_str() != Some(id) {
        return Err(Error::Protocol(format!(
            "{method}: response id {} does not match request id {id}",
            response.id
        )));
    }

    response
        .result
        .ok_or_else(|| Error::Protocol(format!("{method}: response has no result")))
}

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub version: &'static str,
    pub id: String,
    pub method: &'a str,
    pub params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorPayload {
    pub code: i64,
    pub message: String,
}

/// The subset of `getblockchaininfo` the indexer needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    #[serde(rename = "blocks")]
    pub tip_height: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
    #[serde(rename = "verificationprogress", deserialize_with = "number_as_f64")]
    pub sync_progress: f64,
    #[serde(rename = "initialblockdownload", default)]
    pub initial_block_download: bool,
}

/// Numbers keep their exact text under `arbitrary_precision`; bitcoind's float output does
/// not always survive a direct `f64` visit.
fn number_as_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let number = Number::deserialize(deserializer)?;
    number
        .as_f64()
        .ok_or_else(|| serde::de::Error::custom(format!("{number} is not a finite number")))
}

/// `getblock` verbosity levels the indexer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Transactions plus the spent output of every non-coinbase input.
    WithPrevout = 3,
}

/// A `getblock` result as the node sent it, decoded later by the block processor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock(pub Value);

//! Turns a `getblock` (verbosity 3) payload into the normalized entity graph.
//!
//! Everything here is pure: no I/O, no clocks. Structural problems in the payload and
//! violated invariants both come back as integrity errors.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{
    Block, Decimal, Input, Output, Prevout, ScriptPubKey, Transaction, RBF_SEQUENCE_THRESHOLD,
};
use crate::rpc::RawBlock;

#[derive(Debug, Deserialize)]
struct RawBlockBody {
    hash: String,
    height: u64,
    version: i32,
    #[serde(rename = "versionHex")]
    version_hex: String,
    #[serde(rename = "merkleroot")]
    merkle_root: String,
    time: i64,
    #[serde(rename = "mediantime")]
    median_time: i64,
    nonce: u32,
    bits: String,
    difficulty: Decimal,
    chainwork: String,
    #[serde(rename = "nTx")]
    n_tx: u32,
    #[serde(rename = "previousblockhash")]
    previous_block_hash: Option<String>,
    #[serde(rename = "nextblockhash")]
    next_block_hash: Option<String>,
    #[serde(rename = "strippedsize")]
    stripped_size: u32,
    size: u32,
    weight: u32,
    tx: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    txid: String,
    hash: String,
    version: i32,
    size: u32,
    vsize: u32,
    weight: u32,
    locktime: u32,
    vin: Vec<RawInput>,
    vout: Vec<RawOutput>,
    fee: Option<Decimal>,
    hex: String,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    coinbase: Option<String>,
    txid: Option<String>,
    vout: Option<u32>,
    #[serde(rename = "scriptSig")]
    script_sig: Option<RawScriptSig>,
    #[serde(rename = "txinwitness", default)]
    witness: Vec<String>,
    prevout: Option<RawPrevout>,
    sequence: u32,
}

#[derive(Debug, Deserialize)]
struct RawScriptSig {
    asm: String,
    hex: String,
}

#[derive(Debug, Deserialize)]
struct RawPrevout {
    height: u64,
    value: Decimal,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: RawScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    value: Decimal,
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: RawScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct RawScriptPubKey {
    asm: String,
    desc: Option<String>,
    hex: String,
    address: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

impl From<RawScriptPubKey> for ScriptPubKey {
    fn from(raw: RawScriptPubKey) -> Self {
        ScriptPubKey {
            asm: raw.asm,
            desc: raw.desc,
            hex: raw.hex,
            address: raw.address,
            kind: raw.kind,
        }
    }
}

pub fn is_segwit(txid: &str, hash: &str) -> bool {
    txid != hash
}

pub fn signals_rbf(sequences: impl IntoIterator<Item = u32>) -> bool {
    sequences
        .into_iter()
        .any(|sequence| sequence < RBF_SEQUENCE_THRESHOLD)
}

pub fn transform(raw: RawBlock) -> Result<Block> {
    let body: RawBlockBody = serde_json::from_value(raw.0)
        .map_err(|e| Error::integrity(format!("malformed block payload: {e}")))?;
    process_block(body)
}

fn process_block(raw: RawBlockBody) -> Result<Block> {
    let height = raw.height;
    if i64::try_from(height).is_err() {
        return Err(Error::integrity(format!("height {height} out of range")));
    }
    check_hash("block hash", &raw.hash)?;
    check_hash("merkle root", &raw.merkle_root)?;
    if let Some(previous) = &raw.previous_block_hash {
        check_hash("previous block hash", previous)?;
    }
    if let Some(next) = &raw.next_block_hash {
        check_hash("next block hash", next)?;
    }
    if raw.n_tx as usize != raw.tx.len() {
        return Err(Error::integrity(format!(
            "block {height} reports {} transactions but carries {}",
            raw.n_tx,
            raw.tx.len()
        )));
    }
    if raw.tx.is_empty() {
        return Err(Error::integrity(format!("block {height} has no transactions")));
    }

    let time = utc(raw.time, "block time")?;
    let median_time = utc(raw.median_time, "median time")?;

    let transactions = raw
        .tx
        .into_iter()
        .enumerate()
        .map(|(position, tx)| process_transaction(tx, position == 0, &raw.hash, height, time))
        .collect::<Result<Vec<_>>>()?;

    Ok(Block {
        block_hash: raw.hash,
        height,
        version: raw.version,
        version_hex: raw.version_hex,
        merkle_root: raw.merkle_root,
        time,
        median_time,
        nonce: raw.nonce,
        bits: raw.bits,
        difficulty: raw.difficulty,
        chainwork: raw.chainwork,
        n_tx: raw.n_tx,
        previous_block_hash: raw.previous_block_hash,
        next_block_hash: raw.next_block_hash,
        stripped_size: raw.stripped_size,
        size: raw.size,
        weight: raw.weight,
        transactions,
    })
}

fn process_transaction(
    raw: RawTransaction,
    first: bool,
    block_hash: &str,
    block_height: u64,
    block_time: DateTime<Utc>,
) -> Result<Transaction> {
    check_hash("txid", &raw.txid)?;
    check_hash("wtxid", &raw.hash)?;

    if raw.vin.is_empty() || raw.vout.is_empty() {
        return Err(Error::integrity(format!(
            "transaction {} has {} inputs and {} outputs",
            raw.txid,
            raw.vin.len(),
            raw.vout.len()
        )));
    }
    let coinbase_inputs = raw.vin.iter().filter(|input| input.coinbase.is_some()).count();
    if coinbase_inputs > 0 && !(first && raw.vin.len() == 1) {
        return Err(Error::integrity(format!(
            "transaction {} has a coinbase input outside the first transaction's only input",
            raw.txid
        )));
    }
    if first && coinbase_inputs == 0 {
        return Err(Error::integrity(format!(
            "first transaction {} of block {block_height} is not a coinbase",
            raw.txid
        )));
    }
    if let Some(fee) = &raw.fee {
        if fee.is_negative() {
            return Err(Error::integrity(format!(
                "transaction {} has negative fee {fee}",
                raw.txid
            )));
        }
    }

    let segwit = is_segwit(&raw.txid, &raw.hash);
    let replace_by_fee = signals_rbf(raw.vin.iter().map(|input| input.sequence));

    let inputs = raw
        .vin
        .into_iter()
        .enumerate()
        .map(|(index, input)| process_input(&raw.txid, index as u32, input))
        .collect::<Result<Vec<_>>>()?;

    let outputs = raw
        .vout
        .into_iter()
        .enumerate()
        .map(|(index, output)| process_output(&raw.txid, index as u32, output))
        .collect::<Result<Vec<_>>>()?;

    Ok(Transaction {
        txid: raw.txid,
        hash: raw.hash,
        segwit,
        replace_by_fee,
        version: raw.version,
        size: raw.size,
        vsize: raw.vsize,
        weight: raw.weight,
        locktime: raw.locktime,
        fee: raw.fee,
        hex: raw.hex,
        block_hash: block_hash.to_string(),
        block_height,
        block_time,
        inputs,
        outputs,
    })
}

fn process_input(txid: &str, input_index: u32, raw: RawInput) -> Result<Input> {
    let (script_sig_asm, script_sig_hex) = match raw.script_sig {
        Some(script_sig) => (Some(script_sig.asm), Some(script_sig.hex)),
        None => (None, None),
    };

    match &raw.coinbase {
        Some(_) => {
            if raw.txid.is_some() || raw.vout.is_some() || raw.prevout.is_some() {
                return Err(Error::integrity(format!(
                    "coinbase input {txid}:{input_index} also references a previous output"
                )));
            }
        }
        None => {
            match &raw.txid {
                Some(previous) => check_hash("previous txid", previous)?,
                None => {
                    return Err(Error::integrity(format!(
                        "input {txid}:{input_index} has neither coinbase nor previous txid"
                    )))
                }
            }
            if raw.vout.is_none() {
                return Err(Error::integrity(format!(
                    "input {txid}:{input_index} has no previous output index"
                )));
            }
            if raw.prevout.is_none() {
                return Err(Error::integrity(format!(
                    "input {txid}:{input_index} has no prevout snapshot"
                )));
            }
        }
    }

    let prevout = match raw.prevout {
        Some(prevout) => {
            if prevout.value.is_negative() {
                return Err(Error::integrity(format!(
                    "input {txid}:{input_index} spends a negative value {}",
                    prevout.value
                )));
            }
            if i64::try_from(prevout.height).is_err() {
                return Err(Error::integrity(format!(
                    "input {txid}:{input_index} prevout height {} out of range",
                    prevout.height
                )));
            }
            Some(Prevout {
                height: prevout.height,
                value: prevout.value,
                script_pub_key: prevout.script_pub_key.into(),
            })
        }
        None => None,
    };

    Ok(Input {
        txid: txid.to_string(),
        input_index,
        previous_txid: raw.txid,
        previous_output_index: raw.vout,
        coinbase: raw.coinbase,
        script_sig_asm,
        script_sig_hex,
        witness: raw.witness,
        prevout,
        sequence: raw.sequence,
    })
}

fn process_output(txid: &str, position: u32, raw: RawOutput) -> Result<Output> {
    if raw.n != position {
        return Err(Error::integrity(format!(
            "output {txid}:{} found at position {position}",
            raw.n
        )));
    }
    if raw.value.is_negative() {
        return Err(Error::integrity(format!(
            "output {txid}:{position} has negative value {}",
            raw.value
        )));
    }

    Ok(Output {
        txid: txid.to_string(),
        output_index: raw.n,
        value: raw.value,
        script_pub_key: raw.script_pub_key.into(),
    })
}

fn utc(seconds: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::integrity(format!("{field} {seconds} is not a valid timestamp")))
}

fn check_hash(field: &str, value: &str) -> Result<()> {
    match hex::decode(value) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(Error::integrity(format!("{field} {value:?} is not a 32-byte hex hash"))),
    }
}

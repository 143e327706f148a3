use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Sequence numbers below this value signal opt-in replace-by-fee.
pub const RBF_SEQUENCE_THRESHOLD: u32 = 0xffff_fffe;

#[derive(Debug, Clone)]
pub struct Block {
    pub block_hash: String,
    pub height: u64,
    pub version: i32,
    pub version_hex: String,
    pub merkle_root: String,
    pub time: DateTime<Utc>,
    pub median_time: DateTime<Utc>,
    pub nonce: u32,
    pub bits: String,
    pub difficulty: Decimal,
    pub chainwork: String,
    pub n_tx: u32,
    pub previous_block_hash: Option<String>,
    pub next_block_hash: Option<String>,
    pub stripped_size: u32,
    pub size: u32,
    pub weight: u32,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub txid: String,
    pub hash: String,
    pub segwit: bool,
    pub replace_by_fee: bool,
    pub version: i32,
    pub size: u32,
    pub vsize: u32,
    pub weight: u32,
    pub locktime: u32,
    /// `None` for the coinbase transaction, which pays no fee.
    pub fee: Option<Decimal>,
    pub hex: String,
    pub block_hash: String,
    pub block_height: u64,
    pub block_time: DateTime<Utc>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone)]
pub struct Input {
    pub txid: String,
    pub input_index: u32,
    pub previous_txid: Option<String>,
    pub previous_output_index: Option<u32>,
    pub coinbase: Option<String>,
    pub script_sig_asm: Option<String>,
    pub script_sig_hex: Option<String>,
    pub witness: Vec<String>,
    pub prevout: Option<Prevout>,
    pub sequence: u32,
}

/// Snapshot of the output an input spends, as reported by the node at fetch time.
#[derive(Debug, Clone)]
pub struct Prevout {
    pub height: u64,
    pub value: Decimal,
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone)]
pub struct Output {
    pub txid: String,
    pub output_index: u32,
    pub value: Decimal,
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPubKey {
    pub asm: String,
    pub desc: Option<String>,
    pub hex: String,
    pub address: Option<String>,
    pub kind: String,
}

/// An exact decimal kept in the node's own textual form.
///
/// Amounts and difficulty never pass through a binary float: the JSON number text is
/// validated and carried verbatim into `NUMERIC` columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDecimalError(String);

impl fmt::Display for ParseDecimalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid decimal literal {:?}", self.0)
    }
}

impl std::error::Error for ParseDecimalError {}

impl Decimal {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.starts_with('-') && !self.mantissa_is_zero()
    }

    fn mantissa_is_zero(&self) -> bool {
        self.0
            .split(|c| c == 'e' || c == 'E')
            .next()
            .unwrap_or_default()
            .bytes()
            .all(|b| !(b'1'..=b'9').contains(&b))
    }
}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDecimalError(s.to_string());
        let unsigned = s.strip_prefix('-').unwrap_or(s);
        let (mantissa, exponent) = match unsigned.find(|c| c == 'e' || c == 'E') {
            Some(i) => (&unsigned[..i], Some(&unsigned[i + 1..])),
            None => (unsigned, None),
        };
        let (int, frac) = match mantissa.split_once('.') {
            Some((int, frac)) => (int, Some(frac)),
            None => (mantissa, None),
        };

        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(int) || frac.map_or(false, |f| !digits(f)) {
            return Err(err());
        }
        if let Some(exp) = exponent {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            if !digits(exp) {
                return Err(err());
            }
        }

        Ok(Decimal(s.to_string()))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // With `arbitrary_precision` the number keeps the exact text the node sent.
        let number = serde_json::Number::deserialize(deserializer)?;
        number.to_string().parse().map_err(serde::de::Error::custom)
    }
}

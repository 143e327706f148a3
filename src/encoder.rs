//! CSV rows for `COPY ... FROM STDIN WITH (FORMAT csv)`.
//!
//! PostgreSQL's CSV format reads an unquoted empty field as NULL and a quoted empty field
//! as the empty string, so every text value is quoted and every absent value is left
//! bare. Numbers never need quoting.

use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{Block, Decimal, Input, Output, Transaction};

/// One entity type's mapping onto a relation.
pub trait CopyRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn encode(&self, row: &mut CsvRow);
}

pub fn copy_statement<T: CopyRow>() -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
        T::TABLE,
        T::COLUMNS.join(", ")
    )
}

/// Encodes all rows into one payload, one line per row.
pub fn encode_rows<'a, T: CopyRow + 'a>(rows: impl IntoIterator<Item = &'a T>) -> String {
    let mut row = CsvRow::default();
    for item in rows {
        item.encode(&mut row);
        row.end();
    }
    row.into_inner()
}

#[derive(Debug, Default)]
pub struct CsvRow {
    buf: String,
    fields: usize,
}

impl CsvRow {
    fn separator(&mut self) {
        if self.fields > 0 {
            self.buf.push(',');
        }
        self.fields += 1;
    }

    pub fn text(&mut self, value: &str) -> &mut Self {
        self.separator();
        push_quoted(&mut self.buf, value);
        self
    }

    pub fn opt_text(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => self.text(value),
            None => self.null(),
        }
    }

    pub fn number(&mut self, value: impl Display) -> &mut Self {
        self.separator();
        self.buf.push_str(&value.to_string());
        self
    }

    pub fn opt_number<N: Display>(&mut self, value: Option<N>) -> &mut Self {
        match value {
            Some(value) => self.number(value),
            None => self.null(),
        }
    }

    pub fn decimal(&mut self, value: &Decimal) -> &mut Self {
        self.number(value.as_str())
    }

    pub fn opt_decimal(&mut self, value: Option<&Decimal>) -> &mut Self {
        self.opt_number(value.map(Decimal::as_str))
    }

    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.number(value)
    }

    pub fn timestamp(&mut self, value: &DateTime<Utc>) -> &mut Self {
        self.number(value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// A `TEXT[]` literal; element order is kept.
    pub fn text_array(&mut self, values: &[String]) -> &mut Self {
        let mut literal = String::with_capacity(2 + values.iter().map(|v| v.len() + 3).sum::<usize>());
        literal.push('{');
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                literal.push(',');
            }
            literal.push('"');
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    literal.push('\\');
                }
                literal.push(c);
            }
            literal.push('"');
        }
        literal.push('}');
        self.text(&literal)
    }

    pub fn null(&mut self) -> &mut Self {
        self.separator();
        self
    }

    fn end(&mut self) {
        self.buf.push('\n');
        self.fields = 0;
    }

    fn into_inner(self) -> String {
        self.buf
    }
}

fn push_quoted(buf: &mut String, value: &str) {
    buf.push('"');
    for c in value.chars() {
        if c == '"' {
            buf.push('"');
        }
        buf.push(c);
    }
    buf.push('"');
}

impl CopyRow for Block {
    const TABLE: &'static str = "blocks";
    const COLUMNS: &'static [&'static str] = &[
        "blockhash",
        "height",
        "version",
        "version_hex",
        "merkle_root",
        "time",
        "median_time",
        "nonce",
        "bits",
        "difficulty",
        "chainwork",
        "ntx",
        "previous_block_hash",
        "next_block_hash",
        "stripped_size",
        "size",
        "weight",
    ];

    fn encode(&self, row: &mut CsvRow) {
        row.text(&self.block_hash)
            .number(self.height)
            .number(self.version)
            .text(&self.version_hex)
            .text(&self.merkle_root)
            .timestamp(&self.time)
            .timestamp(&self.median_time)
            .number(self.nonce)
            .text(&self.bits)
            .decimal(&self.difficulty)
            .text(&self.chainwork)
            .number(self.n_tx)
            .opt_text(self.previous_block_hash.as_deref())
            .opt_text(self.next_block_hash.as_deref())
            .number(self.stripped_size)
            .number(self.size)
            .number(self.weight);
    }
}

impl CopyRow for Transaction {
    const TABLE: &'static str = "transactions";
    const COLUMNS: &'static [&'static str] = &[
        "txid",
        "hash",
        "segwit",
        "replace_by_fee",
        "version",
        "size",
        "vsize",
        "weight",
        "locktime",
        "fee",
        "hex",
        "blockhash",
        "blockheight",
        "time",
    ];

    fn encode(&self, row: &mut CsvRow) {
        row.text(&self.txid)
            .text(&self.hash)
            .boolean(self.segwit)
            .boolean(self.replace_by_fee)
            .number(self.version)
            .number(self.size)
            .number(self.vsize)
            .number(self.weight)
            .number(self.locktime)
            .opt_decimal(self.fee.as_ref())
            .text(&self.hex)
            .text(&self.block_hash)
            .number(self.block_height)
            .timestamp(&self.block_time);
    }
}

impl CopyRow for Input {
    const TABLE: &'static str = "vins";
    const COLUMNS: &'static [&'static str] = &[
        "txid",
        "n",
        "prev_txid",
        "prev_vout",
        "coinbase",
        "scriptsig_asm",
        "scriptsig_hex",
        "witness",
        "prev_height",
        "value",
        "script_pubkey_asm",
        "script_pubkey_desc",
        "script_pubkey_hex",
        "script_pubkey_address",
        "script_pubkey_type",
        "sequence",
    ];

    fn encode(&self, row: &mut CsvRow) {
        let prevout = self.prevout.as_ref();
        let script = prevout.map(|p| &p.script_pub_key);

        row.text(&self.txid)
            .number(self.input_index)
            .opt_text(self.previous_txid.as_deref())
            .opt_number(self.previous_output_index)
            .opt_text(self.coinbase.as_deref())
            .opt_text(self.script_sig_asm.as_deref())
            .opt_text(self.script_sig_hex.as_deref())
            .text_array(&self.witness)
            .opt_number(prevout.map(|p| p.height))
            .opt_decimal(prevout.map(|p| &p.value))
            .opt_text(script.map(|s| s.asm.as_str()))
            .opt_text(script.and_then(|s| s.desc.as_deref()))
            .opt_text(script.map(|s| s.hex.as_str()))
            .opt_text(script.and_then(|s| s.address.as_deref()))
            .opt_text(script.map(|s| s.kind.as_str()))
            .number(self.sequence);
    }
}

impl CopyRow for Output {
    const TABLE: &'static str = "vouts";
    const COLUMNS: &'static [&'static str] = &[
        "txid",
        "n",
        "value",
        "script_pubkey_asm",
        "script_pubkey_desc",
        "script_pubkey_hex",
        "script_pubkey_address",
        "script_pubkey_type",
    ];

    fn encode(&self, row: &mut CsvRow) {
        let script = &self.script_pub_key;
        row.text(&self.txid)
            .number(self.output_index)
            .decimal(&self.value)
            .text(&script.asm)
            .opt_text(script.desc.as_deref())
            .text(&script.hex)
            .opt_text(script.address.as_deref())
            .text(&script.kind);
    }
}

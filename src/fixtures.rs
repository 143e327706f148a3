//! `getblock` payloads shaped like bitcoind's verbosity 3 output.

use serde_json::{json, Number, Value};

use crate::rpc::RawBlock;

/// A 32-byte hash made of one repeated byte.
pub fn hash(byte: u8) -> String {
    format!("{byte:02x}").repeat(32)
}

pub fn block_hash(height: u64) -> String {
    format!("{:064x}", 0xb10c_0000_u64 + height)
}

pub fn coinbase_txid(height: u64) -> String {
    format!("{:064x}", 0xc0_0000_0000_u64 + height)
}

pub fn spend_txid(height: u64) -> String {
    format!("{:064x}", 0x7a_0000_0000_u64 + height)
}

/// A JSON number carrying exactly this text.
pub fn num(text: &str) -> Value {
    Value::Number(text.parse::<Number>().unwrap())
}

/// Block at `height` with a coinbase and one standard spend.
pub fn raw_block(height: u64) -> RawBlock {
    let coinbase = json!({
        "txid": coinbase_txid(height),
        "hash": coinbase_txid(height),
        "version": 1,
        "size": 134,
        "vsize": 134,
        "weight": 536,
        "locktime": 0,
        "vin": [{
            "coinbase": "04ffff001d0104",
            "sequence": 0xffff_ffff_u32
        }],
        "vout": [{
            "value": num("50.00000000"),
            "n": 0,
            "scriptPubKey": {
                "asm": "0496b538e853519c726a2c91e61ec11600ae1390813a627c66fb8be7947be63c52 OP_CHECKSIG",
                "desc": "pk(0496b538e853519c726a2c91e61ec11600ae1390813a627c66fb8be7947be63c52)#8lq3",
                "hex": "410496b538e853519c726a2c91e61ec11600ae1390813a627c66fb8be7947be63c52ac",
                "type": "pubkey"
            }
        }],
        "hex": "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff0704ffff001d0104ffffffff"
    });

    let spend = json!({
        "txid": spend_txid(height),
        "hash": spend_txid(height),
        "version": 2,
        "size": 225,
        "vsize": 225,
        "weight": 900,
        "locktime": 0,
        "vin": [{
            "txid": hash(0xaa),
            "vout": 0,
            "scriptSig": {
                "asm": "3045022100 02b4",
                "hex": "483045022100"
            },
            "prevout": {
                "generated": true,
                "height": height.saturating_sub(1),
                "value": num("50.00000000"),
                "scriptPubKey": {
                    "asm": "OP_DUP OP_HASH160 62e907b15cbf27d5425399ebf6f0fb50ebb88f18 OP_EQUALVERIFY OP_CHECKSIG",
                    "desc": "addr(1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa)#ns3f5w84",
                    "hex": "76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac",
                    "type": "pubkeyhash"
                }
            },
            "sequence": 0xffff_ffff_u32
        }],
        "vout": [
            {
                "value": num("49.99998766"),
                "n": 0,
                "scriptPubKey": {
                    "asm": "OP_DUP OP_HASH160 62e907b15cbf27d5425399ebf6f0fb50ebb88f18 OP_EQUALVERIFY OP_CHECKSIG",
                    "desc": "addr(1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa)#ns3f5w84",
                    "hex": "76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac",
                    "address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
                    "type": "pubkeyhash"
                }
            },
            {
                "value": num("0.00000000"),
                "n": 1,
                "scriptPubKey": {
                    "asm": "OP_RETURN 4e4f4d",
                    "desc": "raw(6a034e4f4d)#q3z6",
                    "hex": "6a034e4f4d",
                    "type": "nulldata"
                }
            }
        ],
        "fee": num("0.00001234"),
        "hex": "0200000001aaaaaaaa"
    });

    RawBlock(json!({
        "hash": block_hash(height),
        "confirmations": 10,
        "height": height,
        "version": 536870912,
        "versionHex": "20000000",
        "merkleroot": hash(0x4d),
        "time": 1231469665_i64 + (height as i64 - 1) * 600,
        "mediantime": 1231469665_i64 + (height as i64 - 1) * 600 - 3000,
        "nonce": 2573394689_u32,
        "bits": "1d00ffff",
        "difficulty": num("1"),
        "chainwork": "0000000000000000000000000000000000000000000000000000000200020002",
        "nTx": 2,
        "previousblockhash": block_hash(height.saturating_sub(1)),
        "nextblockhash": block_hash(height + 1),
        "strippedsize": 359,
        "size": 359,
        "weight": 1436,
        "tx": [coinbase, spend]
    }))
}

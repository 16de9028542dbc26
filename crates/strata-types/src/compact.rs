//! Compact storage encoding.
//!
//! Starts from the canonical value tree, swaps field names for short aliases,
//! stores identifier fields as raw bytes instead of hex text, and serializes the
//! result with `bincode`. Decoding reverses each step, so
//! `decode(encode(x)) == x` for every entity.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::canonical::to_canonical_value;
use crate::error::{Result, TypeError};

/// Long field name to storage alias. Aliases never collide with a long name.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("account_states", "as"),
    ("amount", "a"),
    ("balance", "b"),
    ("balance_lock", "bl"),
    ("begin_block_number", "bb"),
    ("block_identifier", "bi"),
    ("block_number", "bn"),
    ("block_type", "bt"),
    ("end_block_number", "eb"),
    ("fee_account", "fac"),
    ("fee_amount", "fa"),
    ("hash", "h"),
    ("identifier", "id"),
    ("is_fee", "f"),
    ("last_block_identifier", "lbi"),
    ("last_block_number", "lbn"),
    ("last_block_timestamp", "lbt"),
    ("memo", "m"),
    ("message", "msg"),
    ("network_addresses", "na"),
    ("next_block_identifier", "nbi"),
    ("node", "n"),
    ("primary_validator_schedule", "pvs"),
    ("recipient", "r"),
    ("signature", "sig"),
    ("signed_change_request", "scr"),
    ("signer", "s"),
    ("timestamp", "ts"),
    ("txs", "t"),
    ("updated_account_states", "uas"),
];

/// Fields whose string values are hex identifiers.
const IDENTIFIER_FIELDS: &[&str] = &[
    "balance_lock",
    "block_identifier",
    "fee_account",
    "hash",
    "identifier",
    "last_block_identifier",
    "next_block_identifier",
    "recipient",
    "signature",
    "signer",
];

/// Fields holding maps keyed by account identifier.
const ACCOUNT_MAP_FIELDS: &[&str] = &["account_states", "updated_account_states"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum CompactValue {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<CompactValue>),
    Map(Vec<(CompactValue, CompactValue)>),
}

/// Encode `value` in the compact storage form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let canonical = to_canonical_value(value)?;
    let compact = compact_value(canonical, None);
    bincode::serialize(&compact).map_err(|e| TypeError::Serialization(e.to_string()))
}

/// Decode a value previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let compact: CompactValue =
        bincode::deserialize(bytes).map_err(|e| TypeError::CompactDecoding(e.to_string()))?;
    let value = expand_value(compact)?;
    serde_json::from_value(value).map_err(|e| TypeError::CompactDecoding(e.to_string()))
}

fn alias(key: &str) -> &str {
    KEY_ALIASES
        .iter()
        .find(|(long, _)| *long == key)
        .map_or(key, |(_, short)| short)
}

fn unalias(key: &str) -> &str {
    KEY_ALIASES
        .iter()
        .find(|(_, short)| *short == key)
        .map_or(key, |(long, _)| long)
}

/// Raw bytes of `text` if it is lowercase hex that re-encodes to itself.
fn raw_hex(text: &str) -> Option<Vec<u8>> {
    let bytes = hex::decode(text).ok()?;
    (hex::encode(&bytes) == text).then_some(bytes)
}

fn compact_value(value: Value, field: Option<&str>) -> CompactValue {
    match value {
        Value::Null => CompactValue::Null,
        Value::Bool(b) => CompactValue::Bool(b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                CompactValue::UInt(u)
            } else if let Some(i) = n.as_i64() {
                CompactValue::Int(i)
            } else {
                CompactValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => {
            let is_identifier = field.is_some_and(|f| IDENTIFIER_FIELDS.contains(&f));
            match is_identifier.then(|| raw_hex(&s)).flatten() {
                Some(bytes) => CompactValue::Bytes(bytes),
                None => CompactValue::Text(s),
            }
        }
        Value::Array(items) => {
            CompactValue::List(items.into_iter().map(|v| compact_value(v, field)).collect())
        }
        Value::Object(map) => {
            let keyed_by_account = field.is_some_and(|f| ACCOUNT_MAP_FIELDS.contains(&f));
            let entries = map
                .into_iter()
                .map(|(key, value)| {
                    if keyed_by_account {
                        let compact_key = match raw_hex(&key) {
                            Some(bytes) => CompactValue::Bytes(bytes),
                            None => CompactValue::Text(key),
                        };
                        (compact_key, compact_value(value, None))
                    } else {
                        let compact = compact_value(value, Some(&key));
                        (CompactValue::Text(alias(&key).to_string()), compact)
                    }
                })
                .collect();
            CompactValue::Map(entries)
        }
    }
}

fn expand_value(value: CompactValue) -> Result<Value> {
    Ok(match value {
        CompactValue::Null => Value::Null,
        CompactValue::Bool(b) => Value::Bool(b),
        CompactValue::UInt(u) => Value::Number(u.into()),
        CompactValue::Int(i) => Value::Number(i.into()),
        CompactValue::Float(f) => Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| TypeError::CompactDecoding(format!("non-finite number {f}")))?,
        CompactValue::Text(s) => Value::String(s),
        CompactValue::Bytes(bytes) => Value::String(hex::encode(bytes)),
        CompactValue::List(items) => Value::Array(
            items
                .into_iter()
                .map(expand_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        CompactValue::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = match key {
                    CompactValue::Text(text) => unalias(&text).to_string(),
                    CompactValue::Bytes(bytes) => hex::encode(bytes),
                    other => {
                        return Err(TypeError::CompactDecoding(format!(
                            "unsupported map key {other:?}"
                        )))
                    }
                };
                map.insert(key, expand_value(value)?);
            }
            Value::Object(map)
        }
    })
}

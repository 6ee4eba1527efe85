//! Upstream data sources: subgraphs, beacon API, IPFS and the vote store.

use alloy_primitives::{Address, U256};
use serde_json::Value;

use crate::prelude::*;

pub mod beacon;
pub mod graph;
pub mod ipfs;
pub mod pools;
pub mod protocol;
pub mod queries;
pub mod store;

pub(crate) fn str_field<'a>(entity: &'a Value, field: &str) -> Result<&'a str, Error> {
    entity
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::parse(format!("missing field {field}")))
}

/// Subgraphs render integers as JSON strings; tolerate plain numbers too.
pub(crate) fn u64_field(entity: &Value, field: &str) -> Result<u64, Error> {
    let value = entity
        .get(field)
        .ok_or_else(|| Error::parse(format!("missing field {field}")))?;

    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::parse(format!("field {field} out of range"))),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| Error::parse(format!("field {field}: {s}"))),
        _ => Err(Error::parse(format!("field {field} is not an integer"))),
    }
}

pub(crate) fn i64_field(entity: &Value, field: &str) -> Result<i64, Error> {
    let value = entity
        .get(field)
        .ok_or_else(|| Error::parse(format!("missing field {field}")))?;

    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::parse(format!("field {field} out of range"))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::parse(format!("field {field}: {s}"))),
        _ => Err(Error::parse(format!("field {field} is not an integer"))),
    }
}

pub(crate) fn u256_field(entity: &Value, field: &str) -> Result<U256, Error> {
    let raw = str_field(entity, field)?;

    U256::from_str_radix(raw, 10).map_err(|_| Error::parse(format!("field {field}: {raw}")))
}

pub(crate) fn address_field(entity: &Value, field: &str) -> Result<Address, Error> {
    let raw = str_field(entity, field)?;

    raw.parse::<Address>()
        .map_err(|_| Error::parse(format!("field {field}: {raw}")))
}

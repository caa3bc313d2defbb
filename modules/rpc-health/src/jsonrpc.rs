//! JSON-RPC 2.0 envelopes and quantity decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
    pub id: u64,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        RpcRequest { jsonrpc: "2.0", method, params, id }
    }
}

/// Response envelope. A `null` result deserializes as absent.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Decode a `0x`-prefixed big-endian hex quantity.
pub fn parse_quantity(v: &Value) -> Result<u128, String> {
    let s = v.as_str().ok_or_else(|| format!("expected hex string, got {}", v))?;
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| format!("missing 0x prefix in {:?}", s))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("invalid hex quantity {:?}", s));
    }
    u128::from_str_radix(digits, 16).map_err(|_| format!("quantity {:?} exceeds 128 bits", s))
}

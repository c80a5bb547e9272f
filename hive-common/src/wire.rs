//! # Wire Contract
//!
//! Purpose: Define the request/response types peers exchange for the four
//! cache operations. Encoding is the transport's business; the structs
//! derive `serde` so any framing (JSON, msgpack, a binary codec) can carry
//! them unchanged.
//!
//! ## Usage Notes
//!
//! - `Get`, `Remove`, and `Clear` all address a `(group, key)` pair and
//!   share [`GetRequest`]; `Clear` ignores the key.
//! - `expire` is an absolute nanosecond deadline in the owning group's
//!   timer domain, zero meaning none.

use serde::{Deserialize, Serialize};

use crate::types::Expiry;

/// Addresses one key in one group; the request shape for Get, Remove, and
/// Clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    /// Name of the cache group.
    pub group: String,
    /// Key within the group.
    pub key: String,
}

impl GetRequest {
    /// Builds a request for the provided group and key.
    pub fn new(group: impl Into<String>, key: impl Into<String>) -> Self {
        GetRequest {
            group: group.into(),
            key: key.into(),
        }
    }
}

/// Response to a Get: the value bytes plus owner-side metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    /// Cached value bytes.
    pub value: Vec<u8>,
    /// Owner's per-minute request rate for the key; informational, zero
    /// when the transport does not track it.
    pub minute_qps: f64,
    /// Absolute expiration deadline the owner stored for the entry.
    pub expire: Expiry,
}

impl GetResponse {
    /// Builds a response carrying `value` with the given deadline.
    pub fn new(value: Vec<u8>, expire: Expiry) -> Self {
        GetResponse {
            value,
            minute_qps: 0.0,
            expire,
        }
    }
}

/// Request to install a value on the owning peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    /// Name of the cache group.
    pub group: String,
    /// Key within the group.
    pub key: String,
    /// Value bytes to install.
    pub value: Vec<u8>,
    /// Absolute expiration deadline, zero for none.
    pub expire: Expiry,
}

impl SetRequest {
    /// Builds a set request for the provided entry data.
    pub fn new(
        group: impl Into<String>,
        key: impl Into<String>,
        value: Vec<u8>,
        expire: Expiry,
    ) -> Self {
        SetRequest {
            group: group.into(),
            key: key.into(),
            value,
            expire,
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Serialize;

/// Error codes returned over JSON-RPC.
///
/// The negative four-digit range follows the JSON-RPC 2.0 reserved codes;
/// the rest are the codes Ethereum tooling expects from a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ErrorCode {
    /// Malformed JSON in the request body.
    ParseError = -32700,
    /// The request envelope is not a valid JSON-RPC request.
    InvalidRequest = -32600,
    /// Unknown or disabled method.
    MethodNotFound = -32601,
    /// Parameter count or shape mismatch.
    InvalidParams = -32602,
    /// Unexpected failure inside the relay.
    InternalError = -32603,
    /// Generic upstream or send-path failure.
    ServerError = -32000,
    /// Filter, subscription or transaction not found; also nonce too high.
    NotFound = -32001,
    GasLimitTooLow = -32003,
    /// Block range spans more than the 7-day timestamp window.
    InvalidTimestampRange = -32004,
    GasLimitTooHigh = -32005,
    GasPriceTooLow = -32009,
    MissingFromBlockParam = -32011,
    /// `eth_call` / `eth_estimateGas` execution failure.
    ExecutionError = -32015,
    NonceTooLow = -32016,
    InsufficientFunds = -32018,
    /// Raw transaction larger than 128 KiB.
    OversizedData = -32201,
    /// EIP-4844 and other unsupported envelopes.
    UnsupportedTransactionType = -32611,
    /// `fromBlock` greater than `toBlock`.
    InvalidBlockRange = -39013,
    /// The EVM reverted; `data` carries the return data.
    ContractRevert = 3,
}

impl ErrorCode {
    pub fn value(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, msg: impl ToString) -> Self {
        Self {
            code: code.value(),
            message: msg.to_string(),
            data: None,
        }
    }
}

impl From<anyhow::Error> for JsonRpcError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            code: ErrorCode::ServerError.value(),
            message: format!("{:#}", value),
            data: None,
        }
    }
}

impl From<reqwest::Error> for JsonRpcError {
    fn from(value: reqwest::Error) -> Self {
        Self {
            code: ErrorCode::ServerError.value(),
            message: format!("Mirror Node error: {value}"),
            data: None,
        }
    }
}

impl From<JsonRpcError> for jsonrpc_v2::Error {
    fn from(value: JsonRpcError) -> Self {
        Self::Full {
            code: value.code,
            message: value.message,
            data: value.data.map(|d| {
                let d: Box<dyn erased_serde::Serialize + Send> = Box::new(d);
                d
            }),
        }
    }
}

pub fn error<T>(code: ErrorCode, msg: impl ToString) -> Result<T, JsonRpcError> {
    Err(JsonRpcError::new(code, msg))
}

pub fn error_with_data<T, E: Serialize>(
    code: ErrorCode,
    msg: impl ToString,
    data: Option<E>,
) -> Result<T, JsonRpcError> {
    let data = data.map(|data| match serde_json::to_value(data) {
        Ok(v) => v,
        Err(e) => serde_json::Value::String(format!("failed to serialize error data: {e}")),
    });
    Err(JsonRpcError {
        code: code.value(),
        message: msg.to_string(),
        data,
    })
}

/// Try to parse revert data as the ABI encoding of `Error(string)` and append
/// the human readable message, so a Solidity `require(x, "reason")` shows up
/// in the JSON-RPC response instead of a hexadecimal blob.
pub fn error_with_revert<T>(
    code: ErrorCode,
    msg: impl ToString,
    data: Option<impl AsRef<[u8]>>,
) -> Result<T, JsonRpcError> {
    let msg = msg.to_string();
    let (msg, data) = match data {
        None => (msg, None),
        Some(data) => {
            let revert = decode_revert_reason(data.as_ref());
            (
                revert.map(|rev| format!("{msg}: {rev}")).unwrap_or(msg),
                Some(format!("0x{}", hex::encode(data))),
            )
        }
    };
    error_with_data(code, msg, data)
}

/// ABI selector of `Error(string)`.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Decode the ABI encoding of `Error(string)`: 4-byte selector, 32-byte
/// offset, 32-byte length, then the UTF-8 bytes.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 + 32 + 32 || data[0..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let len_bytes: [u8; 8] = data[4 + 32 + 24..4 + 32 + 32].try_into().ok()?;
    let len = u64::from_be_bytes(len_bytes) as usize;
    let start = 4 + 32 + 32;
    if data.len() < start + len {
        return None;
    }
    String::from_utf8(data[start..start + len].to_vec()).ok()
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)
    }
}

impl std::error::Error for JsonRpcError {}

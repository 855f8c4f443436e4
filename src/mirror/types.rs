// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data shapes of the Mirror Node REST API. Only the fields the relay
//! consumes are modelled; unknown fields are ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Links {
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimestampRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorBlock {
    /// Number of transactions in the block.
    pub count: u64,
    /// 48-byte hash; trimmed to 32 bytes before it reaches a client.
    pub hash: String,
    pub number: u64,
    pub previous_hash: String,
    pub size: Option<u64>,
    pub timestamp: TimestampRange,
    pub gas_used: u64,
    pub logs_bloom: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<MirrorBlock>,
    #[serde(default)]
    pub links: Links,
}

/// A per-transaction execution record with EVM-shaped fields.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContractResult {
    pub address: Option<String>,
    /// Transferred value in tinybars.
    pub amount: Option<i64>,
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    pub block_gas_used: Option<u64>,
    pub bloom: Option<String>,
    pub call_result: Option<String>,
    pub chain_id: Option<String>,
    pub contract_id: Option<String>,
    pub error_message: Option<String>,
    pub failed_initcode: Option<String>,
    pub from: Option<String>,
    pub function_parameters: Option<String>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<String>,
    pub gas_used: Option<u64>,
    pub hash: Option<String>,
    pub logs: Option<Vec<ContractResultLog>>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: Option<u64>,
    pub r: Option<String>,
    pub s: Option<String>,
    /// Consensus result name, e.g. `SUCCESS` or `WRONG_NONCE`.
    pub result: Option<String>,
    /// Execution status as a quantity, `0x1` on success.
    pub status: Option<String>,
    pub timestamp: Option<String>,
    pub to: Option<String>,
    pub transaction_index: Option<u64>,
    #[serde(rename = "type")]
    pub tx_type: Option<i64>,
    pub v: Option<i64>,
}

impl ContractResult {
    /// An immature record has not been fully indexed yet; the Mirror Node
    /// serves it with missing or zeroed block fields and it should be
    /// re-fetched rather than returned to a client.
    pub fn is_immature(&self) -> bool {
        fn missing(field: &Option<String>) -> bool {
            !matches!(field.as_deref(), Some(s) if !s.is_empty() && s != "0x")
        }
        self.transaction_index.is_none() || self.block_number.is_none() || missing(&self.block_hash)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.result.as_deref(), Some("SUCCESS"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractResultsResponse {
    pub results: Vec<ContractResult>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContractResultLog {
    pub address: Option<String>,
    pub bloom: Option<String>,
    pub contract_id: Option<String>,
    pub data: Option<String>,
    pub index: Option<u64>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A log entry from the standalone logs endpoints, which carry the block and
/// transaction coordinates inline.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorLog {
    pub address: String,
    pub block_hash: String,
    pub block_number: u64,
    pub contract_id: Option<String>,
    pub data: Option<String>,
    pub index: u64,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub transaction_hash: String,
    pub transaction_index: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsResponse {
    pub logs: Vec<MirrorLog>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    /// Balance in tinybars.
    pub balance: u64,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorAccount {
    /// Account in `shard.realm.num` form.
    pub account: String,
    pub evm_address: Option<String>,
    pub ethereum_nonce: Option<u64>,
    pub balance: Option<AccountBalance>,
    pub receiver_sig_required: Option<bool>,
    #[serde(default)]
    pub transactions: Vec<MirrorTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorTransaction {
    pub transaction_id: String,
    pub consensus_timestamp: Option<String>,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorContract {
    pub contract_id: Option<String>,
    pub evm_address: Option<String>,
    pub runtime_bytecode: Option<String>,
    pub bytecode: Option<String>,
    pub deleted: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorToken {
    pub token_id: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    #[serde(rename = "type")]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractStateEntry {
    pub address: Option<String>,
    pub slot: String,
    pub value: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractStateResponse {
    pub state: Vec<ContractStateEntry>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkFee {
    /// Gas price in tinybars.
    pub gas: u64,
    pub transaction_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkFeesResponse {
    pub fees: Vec<NetworkFee>,
    pub timestamp: Option<String>,
}

impl NetworkFeesResponse {
    /// The tinybar gas price of `EthereumTransaction` submissions.
    pub fn ethereum_transaction_gas(&self) -> Option<u64> {
        self.fees
            .iter()
            .find(|f| f.transaction_type.eq_ignore_ascii_case("EthereumTransaction"))
            .map(|f| f.gas)
    }
}

/// Body of the `contracts/call` simulation endpoint.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContractCallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub estimate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractCallResponse {
    pub result: String,
}

/// Error envelope the Mirror Node wraps failures in.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorStatus {
    #[serde(rename = "_status")]
    pub status: StatusMessages,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusMessages {
    pub messages: Vec<StatusMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusMessage {
    pub message: String,
    pub detail: Option<String>,
    /// Revert data as a hex string, when the simulated call reverted.
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractAction {
    pub call_depth: u32,
    pub call_operation_type: Option<String>,
    pub call_type: Option<String>,
    pub caller: Option<String>,
    pub from: Option<String>,
    pub gas: u64,
    pub gas_used: u64,
    pub index: u32,
    pub input: Option<String>,
    pub recipient: Option<String>,
    pub result_data: Option<String>,
    /// `OUTPUT`, `REVERT_REASON` or `ERROR`.
    pub result_data_type: Option<String>,
    pub timestamp: Option<String>,
    pub to: Option<String>,
    /// Transferred value in tinybars.
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractActionsResponse {
    pub actions: Vec<ContractAction>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Opcode {
    pub depth: u32,
    pub gas: i64,
    pub gas_cost: i64,
    pub memory: Option<Vec<String>>,
    pub op: String,
    pub pc: u32,
    pub reason: Option<String>,
    pub stack: Option<Vec<String>>,
    pub storage: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpcodesResponse {
    pub address: Option<String>,
    pub contract_id: Option<String>,
    pub failed: bool,
    pub gas: i64,
    pub opcodes: Vec<Opcode>,
    pub return_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{ContractCallRequest, ContractResult, NetworkFeesResponse};

    #[test]
    fn immature_results() {
        let mature = ContractResult {
            transaction_index: Some(1),
            block_number: Some(100),
            block_hash: Some(format!("0x{}", "ab".repeat(48))),
            ..Default::default()
        };
        assert!(!mature.is_immature());

        let no_index = ContractResult {
            transaction_index: None,
            ..mature.clone()
        };
        assert!(no_index.is_immature());

        let empty_hash = ContractResult {
            block_hash: Some("0x".to_string()),
            ..mature
        };
        assert!(empty_hash.is_immature());
    }

    #[test]
    fn ethereum_transaction_fee_lookup() {
        let fees: NetworkFeesResponse = serde_json::from_str(
            r#"{"fees":[
                {"gas":853000,"transaction_type":"ContractCall"},
                {"gas":71,"transaction_type":"EthereumTransaction"}
            ],"timestamp":"1696438000.000000000"}"#,
        )
        .unwrap();
        assert_eq!(fees.ethereum_transaction_gas(), Some(71));
    }

    #[test]
    fn call_request_uses_camel_case() {
        let req = ContractCallRequest {
            data: Some("0x1234".into()),
            estimate: true,
            gas_price: Some(71),
            to: Some("0xabc".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["gasPrice"], 71);
        assert_eq!(json["estimate"], true);
        assert!(json.get("from").is_none());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helper methods to convert Mirror Node records into Ethereum data formats.

use anyhow::{anyhow, Context};
use ethers_core::types::{self as et, U256};
use lazy_static::lazy_static;
use serde::Serialize;

use crate::conv::{tinybars_to_weibars, trim_hash, Timestamp};
use crate::mirror::types::{ContractResult, MirrorBlock, MirrorLog};

lazy_static! {
    static ref EMPTY_ETH_HASH: et::H256 = et::H256::default();
    static ref EMPTY_ETH_NONCE: et::H64 = et::H64::default();

    // Keccak-256 of an RLP of an empty array
    static ref EMPTY_UNCLE_HASH: et::H256 = et::H256::from_slice(
        hex::decode("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347")
            .unwrap()
            .as_ref(),
    );

    // Keccak-256 hash of the RLP of null
    static ref EMPTY_ROOT_HASH: et::H256 = et::H256::from_slice(
        hex::decode("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421")
            .unwrap()
            .as_ref(),
    );

    static ref EMPTY_ETH_BLOOM: et::Bloom = et::Bloom::from_slice(&[0u8; 256]);

    /// The Hedera Token Service system contract.
    pub static ref HTS_PRECOMPILE: et::H160 =
        "0x0000000000000000000000000000000000000167".parse().unwrap();
}

/// Every block reports the network block gas limit of 30 million.
pub const BLOCK_GAS_LIMIT: u64 = 30_000_000;

/// Bytecode reported for the HTS system contract itself.
pub const HTS_PRECOMPILE_CODE: &str = "0xfe";

/// Token addresses respond with a proxy contract that redirects every call
/// to the HTS system contract; the token address is spliced into the middle.
const REDIRECT_BYTECODE_PREFIX: &str =
    "6080604052348015600f57600080fd5b506000610167905077618dc65e";
const REDIRECT_BYTECODE_POSTFIX: &str =
    "600052366000602037600080366018016008845af43d806000803e8160008114605857816000f35b816000fdfe\
     a2646970667358221220d8378feed472ba49a0005514ef7087017f707b45fb9bf56bb81bb93ff19a238b64736f\
     6c634300080b0033";

/// Function selectors of the HTS token-create calls; their call results end
/// with the address of the token that was created.
const HTS_CREATE_SELECTORS: [&str; 4] = [
    // createFungibleToken
    "0c0295d0",
    // createFungibleTokenWithCustomFees
    "2af0c59a",
    // createNonFungibleToken
    "9c89bb35",
    // createNonFungibleTokenWithCustomFees
    "5bc7c0e6",
];

pub fn parse_hash(s: &str) -> anyhow::Result<et::H256> {
    let trimmed = trim_hash(s);
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(&trimmed))
        .with_context(|| format!("failed to decode hash {s}"))?;
    if bytes.len() != 32 {
        return Err(anyhow!("hash {s} is not 32 bytes"));
    }
    Ok(et::H256::from_slice(&bytes))
}

pub fn parse_address(s: &str) -> anyhow::Result<et::H160> {
    s.parse()
        .map_err(|e| anyhow!("failed to parse address {s}: {e}"))
}

/// Hex bytes fields; absent or bare `0x` values collapse to empty.
pub fn parse_bytes(s: Option<&str>) -> anyhow::Result<et::Bytes> {
    match s {
        None | Some("") | Some("0x") => Ok(et::Bytes::default()),
        Some(s) => {
            let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
                .with_context(|| format!("failed to decode bytes {s}"))?;
            Ok(et::Bytes::from(bytes))
        }
    }
}

/// Optional hex quantities; absent or bare `0x` values collapse to `None`.
fn parse_quantity_opt(s: Option<&str>) -> anyhow::Result<Option<U256>> {
    match s {
        None | Some("") | Some("0x") => Ok(None),
        Some(s) => {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            let value = U256::from_str_radix(digits, 16)
                .with_context(|| format!("failed to parse quantity {s}"))?;
            Ok(Some(value))
        }
    }
}

/// The log bloom; the Mirror Node yields `0x` for an empty one.
fn parse_bloom(s: Option<&str>) -> et::Bloom {
    match s {
        None | Some("") | Some("0x") => *EMPTY_ETH_BLOOM,
        Some(s) => {
            let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).unwrap_or_default();
            if bytes.len() == 256 {
                et::Bloom::from_slice(&bytes)
            } else {
                *EMPTY_ETH_BLOOM
            }
        }
    }
}

/// Convert a Mirror Node block to Ethereum, with the transaction body
/// already rendered to JSON (hashes or full objects).
pub fn to_eth_block(
    block: &MirrorBlock,
    transactions: Vec<serde_json::Value>,
    base_fee: U256,
) -> anyhow::Result<et::Block<serde_json::Value>> {
    let timestamp = Timestamp::parse(&block.timestamp.from)
        .context("failed to parse the block timestamp")?;

    let block = et::Block {
        hash: Some(parse_hash(&block.hash)?),
        parent_hash: parse_hash(&block.previous_hash)?,
        number: Some(et::U64::from(block.number)),
        timestamp: U256::from(timestamp.seconds),
        author: Some(et::H160::zero()),
        state_root: *EMPTY_ROOT_HASH,
        transactions_root: *EMPTY_ROOT_HASH,
        receipts_root: *EMPTY_ROOT_HASH,
        base_fee_per_gas: Some(base_fee),
        difficulty: U256::zero(),
        total_difficulty: Some(U256::zero()),
        nonce: Some(*EMPTY_ETH_NONCE),
        mix_hash: Some(*EMPTY_ETH_HASH),
        uncles: Vec::new(),
        uncles_hash: *EMPTY_UNCLE_HASH,
        extra_data: et::Bytes::default(),
        logs_bloom: Some(parse_bloom(block.logs_bloom.as_deref())),
        withdrawals_root: Some(*EMPTY_ETH_HASH),
        withdrawals: Some(Vec::new()),
        seal_fields: Vec::new(),
        other: Default::default(),
        transactions,
        size: Some(U256::from(block.size.unwrap_or_default())),
        gas_limit: U256::from(BLOCK_GAS_LIMIT),
        gas_used: U256::from(block.gas_used),
        blob_gas_used: None,
        excess_blob_gas: None,
        parent_beacon_block_root: None,
    };

    Ok(block)
}

/// Convert a contract result into a typed Ethereum transaction object.
/// `from` and `to` are the already-resolved EVM addresses.
pub fn to_eth_transaction(
    result: &ContractResult,
    from: et::H160,
    to: Option<et::H160>,
) -> anyhow::Result<et::Transaction> {
    let hash = result
        .hash
        .as_deref()
        .map(parse_hash)
        .transpose()?
        .ok_or_else(|| anyhow!("contract result has no transaction hash"))?;

    let tx_type = result.tx_type.filter(|t| *t >= 0).map(|t| t as u64);

    let max_fee_per_gas = parse_quantity_opt(result.max_fee_per_gas.as_deref())?;
    let max_priority_fee_per_gas =
        parse_quantity_opt(result.max_priority_fee_per_gas.as_deref())?;

    // A type 2 transaction has no gas price of its own; report the fee cap
    // total so tools that insist on the field have something to show.
    let gas_price = match parse_quantity_opt(result.gas_price.as_deref())? {
        Some(p) => Some(p),
        None if tx_type == Some(2) => Some(
            max_fee_per_gas.unwrap_or_default() + max_priority_fee_per_gas.unwrap_or_default(),
        ),
        None => None,
    };

    let value = tinybars_to_weibars(result.amount.unwrap_or_default().max(0) as u64);

    let tx = et::Transaction {
        hash,
        nonce: U256::from(result.nonce.unwrap_or_default()),
        block_hash: result.block_hash.as_deref().map(parse_hash).transpose()?,
        block_number: result.block_number.map(et::U64::from),
        transaction_index: result.transaction_index.map(et::U64::from),
        from,
        to,
        value,
        gas: U256::from(result.gas_limit.unwrap_or_default()),
        gas_price,
        input: parse_bytes(result.function_parameters.as_deref())?,
        chain_id: parse_quantity_opt(result.chain_id.as_deref())?,
        v: et::U64::from(result.v.unwrap_or_default().max(0) as u64),
        r: parse_quantity_opt(result.r.as_deref())?.unwrap_or_default(),
        s: parse_quantity_opt(result.s.as_deref())?.unwrap_or_default(),
        transaction_type: tx_type.map(et::U64::from),
        // Access lists are accepted on the way in but never stored, so
        // typed envelopes always report an empty one.
        access_list: tx_type.filter(|t| *t >= 1).map(|_| Default::default()),
        max_fee_per_gas: if tx_type == Some(2) { max_fee_per_gas } else { None },
        max_priority_fee_per_gas: if tx_type == Some(2) {
            max_priority_fee_per_gas
        } else {
            None
        },
        other: Default::default(),
    };

    Ok(tx)
}

/// An Ethereum receipt, extended with the revert reason field the relay
/// reports for failed transactions.
#[derive(Debug, Clone, Serialize)]
pub struct RelayReceipt {
    #[serde(flatten)]
    pub receipt: et::TransactionReceipt,
    #[serde(rename = "revertReason", skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
}

/// Assemble a receipt from a contract result and its converted logs.
pub fn to_eth_receipt(
    result: &ContractResult,
    logs: Vec<et::Log>,
    from: et::H160,
    to: Option<et::H160>,
) -> anyhow::Result<RelayReceipt> {
    let transaction_hash = result
        .hash
        .as_deref()
        .map(parse_hash)
        .transpose()?
        .ok_or_else(|| anyhow!("contract result has no transaction hash"))?;

    let contract_address = match hts_created_address(result) {
        Some(addr) => Some(addr),
        None if result.to.is_none() => result
            .address
            .as_deref()
            .filter(|a| !a.is_empty() && *a != "0x")
            .map(parse_address)
            .transpose()?,
        None => None,
    };

    let status = parse_quantity_opt(result.status.as_deref())?
        .map(|s| et::U64::from(s.low_u64()))
        .unwrap_or_else(|| et::U64::from(if result.succeeded() { 1 } else { 0 }));

    let receipt = et::TransactionReceipt {
        transaction_hash,
        transaction_index: et::U64::from(result.transaction_index.unwrap_or_default()),
        block_hash: result.block_hash.as_deref().map(parse_hash).transpose()?,
        block_number: result.block_number.map(et::U64::from),
        from,
        to,
        cumulative_gas_used: U256::from(result.block_gas_used.unwrap_or_default()),
        gas_used: Some(U256::from(result.gas_used.unwrap_or_default())),
        contract_address,
        logs,
        status: Some(status),
        root: Some(*EMPTY_ROOT_HASH),
        logs_bloom: parse_bloom(result.bloom.as_deref()),
        transaction_type: result.tx_type.filter(|t| *t >= 0).map(|t| et::U64::from(t as u64)),
        effective_gas_price: parse_quantity_opt(result.gas_price.as_deref())?,
        other: Default::default(),
    };

    Ok(RelayReceipt {
        receipt,
        revert_reason: result.error_message.as_deref().map(encode_revert_reason),
    })
}

/// Revert reasons pass through when already hex, otherwise the ASCII text is
/// hex encoded.
fn encode_revert_reason(message: &str) -> String {
    if message.starts_with("0x") {
        message.to_string()
    } else {
        format!("0x{}", hex::encode(message))
    }
}

/// When an HTS create call succeeds, the created token's address is the tail
/// of the call result and becomes the receipt's `contractAddress`.
fn hts_created_address(result: &ContractResult) -> Option<et::H160> {
    let to = result.to.as_deref()?.parse::<et::H160>().ok()?;
    if to != *HTS_PRECOMPILE {
        return None;
    }
    let params = result.function_parameters.as_deref()?.strip_prefix("0x")?;
    let selector = params.get(..8)?;
    if !HTS_CREATE_SELECTORS.contains(&selector) {
        return None;
    }
    let call_result = result.call_result.as_deref()?.strip_prefix("0x")?;
    let tail = call_result.get(call_result.len().checked_sub(40)?..)?;
    format!("0x{tail}").parse().ok()
}

/// Convert a log from the standalone logs endpoints.
pub fn to_eth_log(log: &MirrorLog) -> anyhow::Result<et::Log> {
    let topics = log
        .topics
        .iter()
        .map(|t| parse_hash(t))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(et::Log {
        address: parse_address(&log.address)?,
        topics,
        data: parse_bytes(log.data.as_deref())?,
        block_hash: Some(parse_hash(&log.block_hash)?),
        block_number: Some(et::U64::from(log.block_number)),
        transaction_hash: Some(parse_hash(&log.transaction_hash)?),
        transaction_index: Some(et::U64::from(log.transaction_index.unwrap_or_default())),
        log_index: Some(U256::from(log.index)),
        transaction_log_index: Some(U256::from(log.index)),
        log_type: None,
        removed: Some(false),
    })
}

/// Convert the logs inlined in a contract result, taking the block and
/// transaction coordinates from the surrounding record.
pub fn result_logs_to_eth(result: &ContractResult) -> anyhow::Result<Vec<et::Log>> {
    let block_hash = result.block_hash.as_deref().map(parse_hash).transpose()?;
    let block_number = result.block_number.map(et::U64::from);
    let transaction_hash = result.hash.as_deref().map(parse_hash).transpose()?;
    let transaction_index = result.transaction_index.map(et::U64::from);

    let mut logs = Vec::new();
    for (idx, log) in result.logs.iter().flatten().enumerate() {
        let address = log
            .address
            .as_deref()
            .map(parse_address)
            .transpose()?
            .unwrap_or_default();
        let topics = log
            .topics
            .iter()
            .map(|t| parse_hash(t))
            .collect::<anyhow::Result<Vec<_>>>()?;

        logs.push(et::Log {
            address,
            topics,
            data: parse_bytes(log.data.as_deref())?,
            block_hash,
            block_number,
            transaction_hash,
            transaction_index,
            log_index: Some(U256::from(log.index.unwrap_or(idx as u64))),
            transaction_log_index: Some(U256::from(idx)),
            log_type: None,
            removed: Some(false),
        });
    }
    Ok(logs)
}

/// The proxy bytecode reported for token addresses.
pub fn redirect_bytecode_for(address: et::H160) -> String {
    format!(
        "0x{}{}{}",
        REDIRECT_BYTECODE_PREFIX,
        hex::encode(address.as_bytes()),
        REDIRECT_BYTECODE_POSTFIX
    )
}

const OP_CALLCODE: u8 = 0xf2;
const OP_DELEGATECALL: u8 = 0xf4;
const OP_SELFDESTRUCT: u8 = 0xff;
const OP_PUSH1: u8 = 0x60;
const OP_PUSH32: u8 = 0x7f;

/// Scan bytecode for opcodes that must not be served from `eth_getCode`,
/// skipping over PUSH immediates so data bytes don't false-positive.
pub fn contains_prohibited_opcodes(code: &[u8]) -> bool {
    let mut i = 0;
    while i < code.len() {
        match code[i] {
            OP_CALLCODE | OP_DELEGATECALL | OP_SELFDESTRUCT => return true,
            op @ OP_PUSH1..=OP_PUSH32 => i += 1 + (op - OP_PUSH1 + 1) as usize,
            _ => i += 1,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::types::ContractResultLog;

    fn mirror_block() -> MirrorBlock {
        serde_json::from_value(serde_json::json!({
            "count": 3,
            "hash": format!("0x{}", "ab".repeat(48)),
            "number": 101,
            "previous_hash": format!("0x{}", "cd".repeat(48)),
            "size": 1024,
            "timestamp": {"from": "1696438000.000000001", "to": "1696438002.000000000"},
            "gas_used": 400000,
            "logs_bloom": "0x"
        }))
        .unwrap()
    }

    #[test]
    fn block_constants() {
        let block = to_eth_block(&mirror_block(), Vec::new(), U256::from(710u64)).unwrap();
        let json = serde_json::to_value(&block).unwrap();

        assert_eq!(json["number"], "0x65");
        assert_eq!(json["hash"].as_str().unwrap().len(), 66);
        assert_eq!(json["gasLimit"], "0x1c9c380");
        assert_eq!(json["gasUsed"], "0x61a80");
        assert_eq!(json["difficulty"], "0x0");
        assert_eq!(json["totalDifficulty"], "0x0");
        assert_eq!(json["extraData"], "0x");
        assert_eq!(json["timestamp"], "0x651d96f0");
        assert_eq!(
            json["miner"],
            "0x0000000000000000000000000000000000000000"
        );
        assert_eq!(
            json["stateRoot"],
            "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
        );
        assert_eq!(
            json["sha3Uncles"],
            "0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347"
        );
        assert_eq!(json["uncles"], serde_json::json!([]));
        assert_eq!(json["withdrawals"], serde_json::json!([]));
        assert_eq!(json["nonce"], "0x0000000000000000");
    }

    fn contract_result(tx_type: Option<i64>) -> ContractResult {
        ContractResult {
            amount: Some(100),
            block_hash: Some(format!("0x{}", "11".repeat(48))),
            block_number: Some(7),
            block_gas_used: Some(500_000),
            bloom: Some("0x".into()),
            call_result: Some("0x01".into()),
            chain_id: Some("0x128".into()),
            from: Some("0x0000000000000000000000000000000000001f41".into()),
            function_parameters: Some("0x1234".into()),
            gas_limit: Some(100_000),
            gas_price: Some("0x2540be400".into()),
            gas_used: Some(60_000),
            hash: Some(format!("0x{}", "22".repeat(32))),
            max_fee_per_gas: Some("0x".into()),
            max_priority_fee_per_gas: Some("0x".into()),
            nonce: Some(4),
            r: Some("0x05".into()),
            s: Some("0x06".into()),
            result: Some("SUCCESS".into()),
            status: Some("0x1".into()),
            to: Some("0x0000000000000000000000000000000000001389".into()),
            transaction_index: Some(2),
            tx_type,
            v: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn legacy_transaction_assembly() {
        let result = contract_result(Some(0));
        let from = result.from.as_deref().unwrap().parse().unwrap();
        let to = result.to.as_deref().unwrap().parse().unwrap();
        let tx = to_eth_transaction(&result, from, Some(to)).unwrap();
        let json = serde_json::to_value(&tx).unwrap();

        assert_eq!(json["nonce"], "0x4");
        assert_eq!(json["gas"], "0x186a0");
        assert_eq!(json["gasPrice"], "0x2540be400");
        assert_eq!(json["type"], "0x0");
        assert_eq!(json["chainId"], "0x128");
        // 100 tinybars in weibars.
        assert_eq!(json["value"], "0xe8d4a51000");
        assert_eq!(json["blockNumber"], "0x7");
        assert_eq!(json["hash"].as_str().unwrap().len(), 66);
        assert_eq!(json["blockHash"].as_str().unwrap().len(), 66);
        assert!(json.get("maxFeePerGas").is_none() || json["maxFeePerGas"].is_null());
    }

    #[test]
    fn eip1559_transaction_assembly() {
        let mut result = contract_result(Some(2));
        result.gas_price = Some("0x".into());
        result.max_fee_per_gas = Some("0x59".into());
        result.max_priority_fee_per_gas = Some("0x21".into());

        let tx = to_eth_transaction(&result, Default::default(), None).unwrap();
        let json = serde_json::to_value(&tx).unwrap();

        assert_eq!(json["type"], "0x2");
        assert_eq!(json["maxFeePerGas"], "0x59");
        assert_eq!(json["maxPriorityFeePerGas"], "0x21");
        // Fee caps summed when the record has no gas price.
        assert_eq!(json["gasPrice"], "0x7a");
        assert_eq!(json["accessList"], serde_json::json!([]));
    }

    #[test]
    fn receipt_normalises_bloom_and_revert_reason() {
        let mut result = contract_result(Some(0));
        result.status = Some("0x0".into());
        result.result = Some("CONTRACT_REVERT_EXECUTED".into());
        result.error_message = Some("Some revert message".into());
        result.logs = Some(vec![ContractResultLog {
            address: Some("0x0000000000000000000000000000000000001389".into()),
            data: Some("0x0a".into()),
            index: Some(0),
            topics: vec![format!("0x{}", "33".repeat(32))],
            ..Default::default()
        }]);

        let logs = result_logs_to_eth(&result).unwrap();
        let receipt = to_eth_receipt(&result, logs, Default::default(), None).unwrap();
        let json = serde_json::to_value(&receipt).unwrap();

        assert_eq!(json["status"], "0x0");
        assert_eq!(
            json["revertReason"],
            format!("0x{}", hex::encode("Some revert message"))
        );
        assert_eq!(json["logsBloom"].as_str().unwrap().len(), 2 + 512);
        assert_eq!(
            json["root"],
            "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
        );
        assert_eq!(json["logs"][0]["logIndex"], "0x0");
        assert_eq!(json["logs"][0]["blockNumber"], "0x7");

        // A reason that is already hex passes through untouched.
        result.error_message = Some("0x08c379a0".into());
        let receipt = to_eth_receipt(&result, Vec::new(), Default::default(), None).unwrap();
        assert_eq!(receipt.revert_reason.as_deref(), Some("0x08c379a0"));
    }

    #[test]
    fn hts_create_yields_contract_address() {
        let token = "00000000000000000000000000000000000abcde";
        let mut result = contract_result(Some(0));
        result.to = Some(format!("{:#x}", *HTS_PRECOMPILE));
        result.function_parameters = Some(format!("0x{}00", HTS_CREATE_SELECTORS[0]));
        result.call_result = Some(format!("0x{:0>24}{token}", "16"));

        let receipt = to_eth_receipt(&result, Vec::new(), Default::default(), None).unwrap();
        assert_eq!(
            receipt.receipt.contract_address,
            Some(format!("0x{token}").parse().unwrap())
        );

        // A plain call to another contract gets no contract address.
        let plain = contract_result(Some(0));
        let receipt = to_eth_receipt(&plain, Vec::new(), Default::default(), None).unwrap();
        assert_eq!(receipt.receipt.contract_address, None);
    }

    #[test]
    fn redirect_bytecode_embeds_the_token() {
        let addr: et::H160 = "0x00000000000000000000000000000000000abcde".parse().unwrap();
        let code = redirect_bytecode_for(addr);
        assert!(code.starts_with("0x6080604052"));
        assert!(code.contains("00000000000000000000000000000000000abcde"));
        assert!(!code.contains(' '));
    }

    #[test]
    fn prohibited_opcode_scan() {
        // DELEGATECALL as an opcode.
        assert!(contains_prohibited_opcodes(&[0x60, 0x00, 0xf4]));
        assert!(contains_prohibited_opcodes(&[0xff]));
        // 0xf4 hidden inside PUSH2 data does not count.
        assert!(!contains_prohibited_opcodes(&[0x61, 0xf4, 0xff, 0x00]));
        assert!(!contains_prohibited_opcodes(&[0x60, 0x80, 0x60, 0x40, 0x52]));
    }

    #[test]
    fn mirror_log_conversion() {
        let log: MirrorLog = serde_json::from_value(serde_json::json!({
            "address": "0x0000000000000000000000000000000000001389",
            "block_hash": format!("0x{}", "ab".repeat(48)),
            "block_number": 10,
            "data": "0x0123",
            "index": 1,
            "topics": [format!("0x{}", "cd".repeat(32))],
            "transaction_hash": format!("0x{}", "ef".repeat(32)),
            "transaction_index": 3
        }))
        .unwrap();

        let log = to_eth_log(&log).unwrap();
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["blockHash"].as_str().unwrap().len(), 66);
        assert_eq!(json["blockNumber"], "0xa");
        assert_eq!(json["logIndex"], "0x1");
        assert_eq!(json["transactionIndex"], "0x3");
        assert_eq!(json["data"], "0x0123");
    }
}

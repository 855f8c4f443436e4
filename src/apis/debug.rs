// SPDX-License-Identifier: MIT OR Apache-2.0

//! `debug_traceTransaction` over the Mirror Node's actions and opcode
//! endpoints.

use ethers_core::types::{self as et};
use jsonrpc_v2::Params;
use serde::{Deserialize, Serialize};

use crate::consensus::SdkClient;
use crate::conv::{tinybars_to_weibars, to_quantity};
use crate::error::{decode_revert_reason, error, ErrorCode};
use crate::mirror::types::{ContractAction, ContractResult};
use crate::{JsonRpcData, JsonRpcResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerOptions {
    pub tracer: Option<String>,
    #[serde(default)]
    pub tracer_config: TracerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerConfig {
    #[serde(default)]
    pub only_top_call: bool,
    #[serde(default)]
    pub enable_memory: bool,
    #[serde(default)]
    pub disable_stack: bool,
    #[serde(default)]
    pub disable_storage: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum TraceParams {
    One((et::H256,)),
    Two((et::H256, TracerOptions)),
}

/// Re-trace an executed transaction.
pub async fn trace_transaction<S: SdkClient>(
    data: JsonRpcData<S>,
    Params(params): Params<TraceParams>,
) -> JsonRpcResult<serde_json::Value> {
    let (tx_hash, options) = match params {
        TraceParams::One((tx_hash,)) => (tx_hash, TracerOptions::default()),
        TraceParams::Two((tx_hash, options)) => (tx_hash, options),
    };

    match options.tracer.as_deref() {
        None | Some("callTracer") => call_tracer(&data, tx_hash, &options.tracer_config).await,
        Some("opcodeLogger") => opcode_logger(&data, tx_hash, &options.tracer_config).await,
        Some(other) => error(ErrorCode::InvalidParams, format!("unknown tracer: {other}")),
    }
}

/// One frame of the call hierarchy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallFrame {
    #[serde(rename = "type")]
    frame_type: String,
    from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    value: String,
    gas: String,
    gas_used: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revert_reason: Option<String>,
    calls: Vec<CallFrame>,
}

async fn call_tracer<S: SdkClient>(
    data: &JsonRpcData<S>,
    tx_hash: et::H256,
    config: &TracerConfig,
) -> JsonRpcResult<serde_json::Value> {
    let id = format!("{tx_hash:#x}");
    let Some(result) = data.mirror.contract_result(&id).await? else {
        return error(ErrorCode::NotFound, "transaction not found");
    };
    let actions = data.mirror.contract_actions(&id).await?;

    let mut top = top_frame(&result, actions.first());

    if !config.only_top_call && actions.len() > 1 {
        for action in &actions[1..] {
            top.calls.push(sub_frame(data, action).await);
        }
    }

    Ok(serde_json::to_value(top).map_err(anyhow::Error::from)?)
}

/// The top-level frame merges the contract result with the first action.
fn top_frame(result: &ContractResult, action: Option<&ContractAction>) -> CallFrame {
    let frame_type = action
        .and_then(|a| a.call_operation_type.clone().or_else(|| a.call_type.clone()))
        .unwrap_or_else(|| {
            if result.to.is_none() {
                "CREATE".to_string()
            } else {
                "CALL".to_string()
            }
        })
        .to_uppercase();

    let failed = !result.succeeded();
    let revert_reason = result
        .error_message
        .as_deref()
        .map(|m| decode_reason(m).unwrap_or_else(|| m.to_string()));

    CallFrame {
        frame_type,
        from: result.from.clone().unwrap_or_default(),
        to: result.to.clone(),
        value: to_quantity(tinybars_to_weibars(
            result.amount.unwrap_or_default().max(0) as u64,
        )),
        gas: to_quantity(result.gas_limit.unwrap_or_default()),
        gas_used: to_quantity(result.gas_used.unwrap_or_default()),
        input: result.function_parameters.clone().unwrap_or_else(|| "0x".into()),
        output: result.call_result.clone(),
        error: failed.then(|| "execution reverted".to_string()),
        revert_reason: if failed { revert_reason } else { None },
        calls: Vec::new(),
    }
}

async fn sub_frame<S: SdkClient>(data: &JsonRpcData<S>, action: &ContractAction) -> CallFrame {
    let frame_type = action
        .call_operation_type
        .clone()
        .or_else(|| action.call_type.clone())
        .unwrap_or_else(|| "CALL".to_string())
        .to_uppercase();

    let mut input = action.input.clone().unwrap_or_else(|| "0x".into());
    let mut output = match action.result_data_type.as_deref() {
        Some("OUTPUT") => action.result_data.clone(),
        _ => None,
    };

    // For nested CREATEs the Mirror Node has no init code; report the
    // created contract's bytecode instead.
    if frame_type == "CREATE" {
        if let Some(to) = action.to.as_deref().or(action.recipient.as_deref()) {
            if let Ok(Some(contract)) = data.mirror.contract(to).await {
                if let Some(bytecode) = contract.bytecode {
                    input = bytecode;
                }
                if output.is_none() {
                    output = contract.runtime_bytecode;
                }
            }
        }
    }

    let (error, revert_reason) = match action.result_data_type.as_deref() {
        Some("REVERT_REASON") => (
            Some("execution reverted".to_string()),
            action.result_data.as_deref().map(|d| {
                decode_reason(d).unwrap_or_else(|| d.to_string())
            }),
        ),
        Some("ERROR") => (action.result_data.clone(), None),
        _ => (None, None),
    };

    CallFrame {
        frame_type,
        from: action.from.clone().unwrap_or_default(),
        to: action.to.clone().or_else(|| action.recipient.clone()),
        value: to_quantity(tinybars_to_weibars(
            action.value.unwrap_or_default().max(0) as u64,
        )),
        gas: to_quantity(action.gas),
        gas_used: to_quantity(action.gas_used),
        input,
        output,
        error,
        revert_reason,
        calls: Vec::new(),
    }
}

/// Decode an ABI-encoded `Error(string)` payload into its message.
fn decode_reason(hex_data: &str) -> Option<String> {
    let bytes = hex::decode(hex_data.strip_prefix("0x")?).ok()?;
    decode_revert_reason(&bytes)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpcodeLoggerResult {
    gas: i64,
    failed: bool,
    return_value: String,
    struct_logs: Vec<StructLog>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StructLog {
    pc: u32,
    op: String,
    gas: i64,
    gas_cost: i64,
    depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<std::collections::HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn opcode_logger<S: SdkClient>(
    data: &JsonRpcData<S>,
    tx_hash: et::H256,
    config: &TracerConfig,
) -> JsonRpcResult<serde_json::Value> {
    let id = format!("{tx_hash:#x}");
    let Some(trace) = data
        .mirror
        .contract_opcodes(
            &id,
            config.enable_memory,
            !config.disable_stack,
            !config.disable_storage,
        )
        .await?
    else {
        return error(ErrorCode::NotFound, "transaction not found");
    };

    let strip = |s: &String| s.strip_prefix("0x").unwrap_or(s).to_string();

    let struct_logs = trace
        .opcodes
        .into_iter()
        .map(|op| StructLog {
            pc: op.pc,
            op: op.op,
            gas: op.gas,
            gas_cost: op.gas_cost,
            depth: op.depth,
            stack: op.stack.map(|s| s.iter().map(strip).collect()),
            memory: op.memory.map(|m| m.iter().map(strip).collect()),
            storage: op.storage.map(|s| {
                s.into_iter().map(|(k, v)| (strip(&k), strip(&v))).collect()
            }),
            reason: op.reason.as_ref().map(strip),
        })
        .collect();

    let result = OpcodeLoggerResult {
        gas: trace.gas,
        failed: trace.failed,
        return_value: trace.return_value.as_ref().map(strip).unwrap_or_default(),
        struct_logs,
    };

    Ok(serde_json::to_value(result).map_err(anyhow::Error::from)?)
}

#[cfg(test)]
mod tests {
    use super::{top_frame, TracerOptions};
    use crate::mirror::types::ContractResult;

    #[test]
    fn tracer_options_parse() {
        let options: TracerOptions = serde_json::from_str(
            r#"{"tracer":"callTracer","tracerConfig":{"onlyTopCall":true}}"#,
        )
        .unwrap();
        assert_eq!(options.tracer.as_deref(), Some("callTracer"));
        assert!(options.tracer_config.only_top_call);
        assert!(!options.tracer_config.enable_memory);
    }

    #[test]
    fn top_frame_from_result_alone() {
        let result = ContractResult {
            from: Some("0x00000000000000000000000000000000000003e9".into()),
            to: None,
            amount: Some(0),
            gas_limit: Some(400_000),
            gas_used: Some(350_000),
            function_parameters: Some("0x6080".into()),
            call_result: Some("0x6080".into()),
            result: Some("SUCCESS".into()),
            ..Default::default()
        };

        let frame = top_frame(&result, None);
        assert_eq!(frame.frame_type, "CREATE");
        assert_eq!(frame.gas, "0x61a80");
        assert!(frame.error.is_none());
        assert!(frame.calls.is_empty());
    }
}

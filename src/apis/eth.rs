// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use ethers_core::types::{self as et, BlockNumber, U256};
use jsonrpc_v2::Params;

use crate::consensus::SdkClient;
use crate::conv::from_eth::decode_raw_transaction;
use crate::conv::from_mirror::{
    self, parse_address, parse_hash, result_logs_to_eth, to_eth_block, to_eth_receipt,
    to_eth_transaction, RelayReceipt, HTS_PRECOMPILE, HTS_PRECOMPILE_CODE,
};
use crate::conv::{parse_quantity, tinybars_to_weibars, to_quantity, trim_hash, weibars_to_tinybars};
use crate::error::{decode_revert_reason, error, ErrorCode, JsonRpcError};
use crate::filters::FilterChanges;
use crate::mirror::types::ContractResult;
use crate::mirror::MirrorCallFailure;
use crate::state::long_zero_entity_num;
use crate::subs::{self, SubKind};
use crate::{JsonRpcData, JsonRpcResult};

/// How often and how long the send path polls the Mirror Node for the
/// record of a freshly submitted transaction.
const RECEIPT_POLL_ATTEMPTS: u32 = 10;
const RECEIPT_POLL_DELAY: Duration = Duration::from_secs(1);

/// Consensus results that never made it into a block and are skipped when a
/// block's transactions are listed.
fn is_listable(result: &ContractResult) -> bool {
    !matches!(
        result.result.as_deref(),
        Some("WRONG_NONCE") | Some("INVALID_ACCOUNT_ID")
    )
}

/// Returns a list of addresses owned by client.
///
/// Always empty: the relay does not manage user keys.
pub async fn accounts<S: SdkClient>(_data: JsonRpcData<S>) -> JsonRpcResult<Vec<et::Address>> {
    Ok(vec![])
}

/// Returns the number of most recent block.
pub async fn block_number<S: SdkClient>(data: JsonRpcData<S>) -> JsonRpcResult<String> {
    let number = data.latest_block_number().await?;
    Ok(to_quantity(number))
}

/// Returns the chain ID used for signing replay-protected transactions.
pub async fn chain_id<S: SdkClient>(data: JsonRpcData<S>) -> JsonRpcResult<String> {
    Ok(to_quantity(data.settings.hedera.chain_id))
}

/// Returns the current price per gas in wei.
pub async fn gas_price<S: SdkClient>(data: JsonRpcData<S>) -> JsonRpcResult<String> {
    let price = data.gas_price().await?;
    Ok(to_quantity(price))
}

/// There is no priority market; tips are always zero.
pub async fn max_priority_fee_per_gas<S: SdkClient>(
    _data: JsonRpcData<S>,
) -> JsonRpcResult<String> {
    Ok("0x0".to_string())
}

/// Mining never happens, so the hashrate is zero.
pub async fn hashrate<S: SdkClient>(_data: JsonRpcData<S>) -> JsonRpcResult<String> {
    Ok("0x0".to_string())
}

pub async fn mining<S: SdkClient>(_data: JsonRpcData<S>) -> JsonRpcResult<bool> {
    Ok(false)
}

/// The relay serves whatever the Mirror Node has; it is never "syncing".
pub async fn syncing<S: SdkClient>(_data: JsonRpcData<S>) -> JsonRpcResult<bool> {
    Ok(false)
}

/// Returns the balance of the account of given address.
pub async fn get_balance<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((address, tag)): Params<(et::Address, BlockNumber)>,
) -> JsonRpcResult<String> {
    let timestamp = data.query_timestamp(tag).await?;
    let account = data
        .mirror
        .account(&format!("{address:#x}"), timestamp.as_deref())
        .await?;

    let tinybars = account
        .and_then(|a| a.balance)
        .map(|b| b.balance)
        .unwrap_or_default();
    Ok(to_quantity(tinybars_to_weibars(tinybars)))
}

/// Returns information about a block by hash.
pub async fn get_block_by_hash<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((block_hash, full_tx)): Params<(et::H256, bool)>,
) -> JsonRpcResult<Option<et::Block<serde_json::Value>>> {
    match data.block_by_hash(block_hash).await? {
        Some(block) => enrich_block(&data, block, full_tx).await.map(Some),
        None => Ok(None),
    }
}

/// Returns information about a block by block number.
pub async fn get_block_by_number<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((tag, full_tx)): Params<(BlockNumber, bool)>,
) -> JsonRpcResult<Option<et::Block<serde_json::Value>>> {
    match data.block_by_tag(tag).await? {
        Some(block) => enrich_block(&data, block, full_tx).await.map(Some),
        None => Ok(None),
    }
}

/// Returns the number of transactions in a block matching the given hash.
pub async fn get_block_transaction_count_by_hash<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((block_hash,)): Params<(et::H256,)>,
) -> JsonRpcResult<Option<String>> {
    let block = data.block_by_hash(block_hash).await?;
    Ok(block.map(|b| to_quantity(b.count)))
}

/// Returns the number of transactions in a block matching the given number.
pub async fn get_block_transaction_count_by_number<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((tag,)): Params<(BlockNumber,)>,
) -> JsonRpcResult<Option<String>> {
    let block = data.block_by_tag(tag).await?;
    Ok(block.map(|b| to_quantity(b.count)))
}

/// Returns code at a given address.
///
/// The HTS system contract reports the invalid opcode; tokens report a
/// proxy that redirects to it; contracts report their runtime bytecode
/// unless it smuggles in prohibited opcodes. Anything else is empty.
pub async fn get_code<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((address, _tag)): Params<(et::Address, BlockNumber)>,
) -> JsonRpcResult<String> {
    if address == *HTS_PRECOMPILE {
        return Ok(HTS_PRECOMPILE_CODE.to_string());
    }

    let cache_key = format!("eth_getCode.{address:#x}");
    if let Some(code) = data.caches.responses.get(&cache_key) {
        if let Some(code) = code.as_str() {
            return Ok(code.to_string());
        }
    }

    let code = lookup_code(&data, address).await;
    data.caches
        .responses
        .insert(cache_key, serde_json::Value::String(code.clone()));
    Ok(code)
}

async fn lookup_code<S: SdkClient>(data: &JsonRpcData<S>, address: et::Address) -> String {
    match data.mirror.contract(&format!("{address:#x}")).await {
        Ok(Some(contract)) => {
            if let Some(code) = contract.runtime_bytecode.filter(|c| c != "0x" && !c.is_empty()) {
                let bytes = hex::decode(code.strip_prefix("0x").unwrap_or(&code))
                    .unwrap_or_default();
                if !from_mirror::contains_prohibited_opcodes(&bytes) {
                    return code;
                }
            }
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(%address, error = %e, "contract lookup failed"),
    }

    if let Some(num) = long_zero_entity_num(&address) {
        if let Ok(Some(_)) = data.mirror.token(&format!("0.0.{num}")).await {
            return from_mirror::redirect_bytecode_for(address);
        }
    }

    match data.consensus.get_bytecode(address).await {
        Ok(code) if !code.is_empty() => format!("0x{}", hex::encode(code)),
        Ok(_) => "0x".to_string(),
        Err(e) => {
            tracing::debug!(%address, error = %e, "consensus bytecode query failed");
            "0x".to_string()
        }
    }
}

/// Returns the value from a storage position at a given address.
pub async fn get_storage_at<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((address, slot, tag)): Params<(et::Address, U256, BlockNumber)>,
) -> JsonRpcResult<String> {
    let timestamp = data.query_timestamp(tag).await?;
    let value = data
        .mirror
        .contract_state(
            &format!("{address:#x}"),
            &format!("{slot:#x}"),
            timestamp.as_deref(),
        )
        .await?;

    // The client expects a full 32-byte word, zero padded.
    let digits = value
        .as_deref()
        .map(|v| v.strip_prefix("0x").unwrap_or(v).to_string())
        .unwrap_or_default();
    Ok(format!("0x{digits:0>64}"))
}

/// Returns the information about a transaction requested by its hash.
pub async fn get_transaction_by_hash<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((tx_hash,)): Params<(et::H256,)>,
) -> JsonRpcResult<Option<et::Transaction>> {
    match data.mirror.contract_result(&format!("{tx_hash:#x}")).await? {
        Some(result) => {
            let (from, to) = resolved_parties(&data, &result).await?;
            Ok(Some(to_eth_transaction(&result, from, to)?))
        }
        None => Ok(None),
    }
}

/// Returns a transaction by block hash and index within the block.
pub async fn get_transaction_by_block_hash_and_index<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((block_hash, index)): Params<(et::H256, et::U64)>,
) -> JsonRpcResult<Option<et::Transaction>> {
    match data.block_by_hash(block_hash).await? {
        Some(block) => transaction_by_index(&data, block, index).await,
        None => Ok(None),
    }
}

/// Returns a transaction by block number and index within the block.
pub async fn get_transaction_by_block_number_and_index<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((tag, index)): Params<(BlockNumber, et::U64)>,
) -> JsonRpcResult<Option<et::Transaction>> {
    match data.block_by_tag(tag).await? {
        Some(block) => transaction_by_index(&data, block, index).await,
        None => Ok(None),
    }
}

/// Returns the number of transactions sent from an address.
///
/// The nonce at a historical block is reconstructed from the account's last
/// Ethereum transaction before that block.
pub async fn get_transaction_count<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((address, tag)): Params<(et::Address, BlockNumber)>,
) -> JsonRpcResult<String> {
    let latest = data.latest_block_number().await?;
    let number = data.block_number_by_tag(tag).await?;

    // Anything within a few blocks of the head is served from the account.
    if number + 10 >= latest {
        let account = data.mirror.account(&format!("{address:#x}"), None).await?;
        let nonce = account.and_then(|a| a.ethereum_nonce).unwrap_or_default();
        return Ok(to_quantity(nonce));
    }

    let Some(block) = data.block_by_tag(BlockNumber::Number(number.into())).await? else {
        return error(ErrorCode::ServerError, format!("block {number} not found"));
    };

    let account = data
        .mirror
        .account_latest_ethereum_transaction(&format!("{address:#x}"), &block.timestamp.to)
        .await?;

    let Some(tx) = account.and_then(|a| a.transactions.into_iter().next()) else {
        return Ok("0x0".to_string());
    };
    let Some(result) = data.mirror.contract_result(&tx.transaction_id).await? else {
        return Ok("0x0".to_string());
    };
    Ok(to_quantity(result.nonce.unwrap_or_default() + 1))
}

/// Returns the receipt of a transaction by transaction hash.
pub async fn get_transaction_receipt<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((tx_hash,)): Params<(et::H256,)>,
) -> JsonRpcResult<Option<RelayReceipt>> {
    match data.mirror.contract_result(&format!("{tx_hash:#x}")).await? {
        Some(result) if !result.is_immature() => {
            let logs = result_logs_to_eth(&result)?;
            let (from, to) = resolved_parties(&data, &result).await?;
            Ok(Some(to_eth_receipt(&result, logs, from, to)?))
        }
        // Still in flight; Ethereum reports pending transactions as null.
        _ => Ok(None),
    }
}

/// Returns receipts for all the transactions in a block.
pub async fn get_block_receipts<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((tag,)): Params<(BlockNumber,)>,
) -> JsonRpcResult<Vec<RelayReceipt>> {
    let Some(block) = data.block_by_tag(tag).await? else {
        return Ok(Vec::new());
    };
    let window = format!(
        "timestamp=gte:{}&timestamp=lte:{}",
        block.timestamp.from, block.timestamp.to
    );

    let results = data.mirror.contract_results(&window).await?;
    let mut logs_by_tx: HashMap<et::H256, Vec<et::Log>> = HashMap::new();
    for log in data.mirror.logs(&window).await? {
        let log = from_mirror::to_eth_log(&log)?;
        if let Some(hash) = log.transaction_hash {
            logs_by_tx.entry(hash).or_default().push(log);
        }
    }

    let mut receipts = Vec::new();
    for result in results.iter().filter(|r| is_listable(r)) {
        let Some(hash) = result.hash.as_deref() else {
            continue;
        };
        let logs = logs_by_tx.remove(&parse_hash(hash)?).unwrap_or_default();
        let (from, to) = resolved_parties(&data, result).await?;
        receipts.push(to_eth_receipt(result, logs, from, to)?);
    }
    Ok(receipts)
}

/// Uncles do not exist; counts are zero and lookups null.
pub async fn get_uncle_count_by_block_hash<S: SdkClient>(
    _data: JsonRpcData<S>,
    _params: Params<(et::H256,)>,
) -> JsonRpcResult<String> {
    Ok("0x0".to_string())
}

pub async fn get_uncle_count_by_block_number<S: SdkClient>(
    _data: JsonRpcData<S>,
    _params: Params<(BlockNumber,)>,
) -> JsonRpcResult<String> {
    Ok("0x0".to_string())
}

pub async fn get_uncle_by_block_hash_and_index<S: SdkClient>(
    _data: JsonRpcData<S>,
    _params: Params<(et::H256, et::U64)>,
) -> JsonRpcResult<Option<et::Block<et::H256>>> {
    Ok(None)
}

pub async fn get_uncle_by_block_number_and_index<S: SdkClient>(
    _data: JsonRpcData<S>,
    _params: Params<(BlockNumber, et::U64)>,
) -> JsonRpcResult<Option<et::Block<et::H256>>> {
    Ok(None)
}

/// Returns an array of all logs matching a given filter object.
pub async fn get_logs<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((filter,)): Params<(et::Filter,)>,
) -> JsonRpcResult<Vec<et::Log>> {
    data.get_logs(&filter).await
}

/// Executes a new message call immediately without creating a transaction.
pub async fn call<S: SdkClient>(
    data: JsonRpcData<S>,
    Params(params): Params<CallParams>,
) -> JsonRpcResult<String> {
    let (call, tag) = params.into_parts();
    let request = call.into_mirror_call(
        Some(block_param(tag)),
        false,
        data.settings.hedera.operator_evm_address,
    )?;

    match data.mirror.contract_call(&request).await {
        Ok(response) => Ok(response.result),
        Err(e) => Err(call_failure(e)),
    }
}

/// Generates and returns an estimate of how much gas is necessary to allow
/// the transaction to complete, by simulating it on the Mirror Node.
pub async fn estimate_gas<S: SdkClient>(
    data: JsonRpcData<S>,
    Params(params): Params<CallParams>,
) -> JsonRpcResult<String> {
    let (call, tag) = params.into_parts();
    let request = call.into_mirror_call(
        Some(block_param(tag)),
        true,
        data.settings.hedera.operator_evm_address,
    )?;

    let response = match data.mirror.contract_call(&request).await {
        Ok(response) => response,
        Err(e) => return Err(call_failure(e)),
    };

    // The estimate comes back as a padded word; strip the leading zeros.
    match parse_quantity(&response.result) {
        Ok(estimate) => Ok(to_quantity(estimate)),
        Err(_) => Ok(response.result),
    }
}

/// Returns base fees, gas usage ratios and (zeroed) priority fee rewards
/// for a range of recent blocks.
pub async fn fee_history<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((count, newest, percentiles)): Params<(U256, BlockNumber, Option<Vec<f64>>)>,
) -> JsonRpcResult<et::FeeHistory> {
    let latest = data.latest_block_number().await?;
    let newest = data.block_number_by_tag(newest).await?.min(latest);
    let count = count
        .low_u64()
        .min(data.settings.gas.fee_history_max_results)
        .min(newest + 1);
    let oldest = newest + 1 - count;

    let mut base_fee_per_gas = Vec::with_capacity(count as usize + 1);
    if data.settings.gas.fee_history_fixed {
        let price = data.gas_price().await?;
        base_fee_per_gas = vec![price; count as usize + 1];
    } else {
        for number in oldest..=newest {
            base_fee_per_gas.push(block_gas_price(&data, number).await?);
        }
        // The appendix estimates the next block's fee with the current price.
        base_fee_per_gas.push(data.gas_price().await?);
    }

    let percentiles = percentiles.unwrap_or_default();
    let reward = if percentiles.is_empty() {
        Vec::new()
    } else {
        vec![vec![U256::zero(); percentiles.len()]; count as usize]
    };

    Ok(et::FeeHistory {
        base_fee_per_gas,
        gas_used_ratio: vec![0.5; count as usize],
        oldest_block: U256::from(oldest),
        reward,
    })
}

async fn block_gas_price<S: SdkClient>(data: &JsonRpcData<S>, number: u64) -> JsonRpcResult<U256> {
    let Some(block) = data.mirror.block(&number.to_string()).await? else {
        return error(ErrorCode::ServerError, format!("block {number} not found"));
    };
    let fees = data.mirror.network_fees(Some(&block.timestamp.to)).await?;
    let tinybars = fees
        .ethereum_transaction_gas()
        .context("the fee schedule has no EthereumTransaction entry")?;
    Ok(tinybars_to_weibars(tinybars))
}

/// Creates new message call transaction or a contract creation for signed
/// transactions, and waits until the Mirror Node has indexed it.
pub async fn send_raw_transaction<S: SdkClient>(
    data: JsonRpcData<S>,
    Params(params): Params<RawTransactionParams>,
) -> JsonRpcResult<et::H256> {
    let (raw, api_key) = params.into_parts();

    data.precheck.check_size(raw.len())?;
    let decoded = decode_raw_transaction(&raw)?;
    tracing::debug!(eth_hash = ?decoded.hash, from = ?decoded.from, "received raw transaction");

    let network_gas_price = data.gas_price().await?;

    let sender = data
        .mirror
        .account(&format!("{:#x}", decoded.from), None)
        .await?;
    let Some(sender) = sender else {
        return error(
            ErrorCode::ServerError,
            format!("sender account {:#x} not found", decoded.from),
        );
    };

    let receiver = match decoded.tx.to().and_then(|to| to.as_address()) {
        Some(to) => data.mirror.account(&format!("{to:#x}"), None).await?,
        None => None,
    };

    data.precheck.check(
        &decoded,
        raw.len(),
        &sender,
        receiver.as_ref(),
        network_gas_price,
    )?;

    let gas_price_tinybars = weibars_to_tinybars(network_gas_price).low_u64();

    // When an API key rode in with the request, charge its hbar budget for
    // the worst-case transaction fee before spending operator funds.
    if let Some(api_key) = api_key {
        let fee_ceiling =
            gas_price_tinybars.saturating_mul(crate::consensus::MAX_TRANSACTION_FEE_GAS);
        if let Err(e) = data.limiter.deduct_hbar(&api_key, fee_ceiling) {
            return error(ErrorCode::ServerError, e);
        }
    }

    let id = data
        .consensus
        .send_raw_transaction(&raw, gas_price_tinybars)
        .await?;

    let record = data
        .mirror
        .contract_result_with_retry(
            &id.to_mirror_format(),
            RECEIPT_POLL_ATTEMPTS,
            RECEIPT_POLL_DELAY,
        )
        .await?;

    match record.as_ref().and_then(|r| r.hash.as_deref()) {
        Some(hash) => Ok(parse_hash(hash)?),
        None => error(
            ErrorCode::ServerError,
            format!("transaction {id} was submitted but the Mirror Node has not indexed it"),
        ),
    }
}

/// Creates a log filter. Poll it with `eth_getFilterChanges`.
pub async fn new_filter<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((filter,)): Params<(et::Filter,)>,
) -> JsonRpcResult<String> {
    data.new_log_filter(&filter).await
}

/// Creates a filter that notifies about new blocks.
pub async fn new_block_filter<S: SdkClient>(data: JsonRpcData<S>) -> JsonRpcResult<String> {
    data.new_block_filter().await
}

/// There is no pending pool to observe.
pub async fn new_pending_transaction_filter<S: SdkClient>(
    _data: JsonRpcData<S>,
) -> JsonRpcResult<String> {
    error(
        ErrorCode::MethodNotFound,
        "eth_newPendingTransactionFilter is not supported",
    )
}

/// Uninstalls a filter with the given id.
pub async fn uninstall_filter<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((filter_id,)): Params<(String,)>,
) -> JsonRpcResult<bool> {
    Ok(data.uninstall_filter(&filter_id))
}

/// Returns everything that happened since the previous poll of the filter.
pub async fn get_filter_changes<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((filter_id,)): Params<(String,)>,
) -> JsonRpcResult<FilterChanges> {
    data.filter_changes(&filter_id).await
}

/// Returns an array of all logs matching the filter with the given id.
pub async fn get_filter_logs<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((filter_id,)): Params<(String,)>,
) -> JsonRpcResult<Vec<et::Log>> {
    data.filter_logs(&filter_id).await
}

/// Subscribe to `newHeads` or `logs` events over a WebSocket.
pub async fn subscribe<S: SdkClient>(
    data: JsonRpcData<S>,
    Params(params): Params<SubscribeParams>,
) -> JsonRpcResult<String> {
    let (event, filter, ws_id) = match params {
        SubscribeParams::One((event, ws_id)) => (event, None, ws_id),
        SubscribeParams::Two((event, filter, ws_id)) => (event, Some(filter), ws_id),
    };

    let kind = match event.as_str() {
        "newHeads" => SubKind::NewHeads,
        "logs" => SubKind::Logs,
        other => {
            return error(
                ErrorCode::InvalidParams,
                format!("unknown subscription: {other}"),
            )
        }
    };

    let sender = data.get_web_socket(&ws_id).await?;
    subs::subscribe(data.0.clone(), ws_id, sender, kind, filter)
        .await
        .map_err(|existing| {
            JsonRpcError::new(
                ErrorCode::InvalidParams,
                format!(
                    "the connection already holds a {:?} subscription; one subscription type per connection",
                    existing.0
                ),
            )
        })
}

/// Unsubscribe from the subscription with the given id.
pub async fn unsubscribe<S: SdkClient>(
    data: JsonRpcData<S>,
    Params((subscription_id,)): Params<(String,)>,
) -> JsonRpcResult<bool> {
    Ok(subs::unsubscribe(&data, &subscription_id).await)
}

/// Fetch the block's contract results and either inline them as full
/// transaction objects or list their hashes.
async fn enrich_block<S: SdkClient>(
    data: &JsonRpcData<S>,
    block: crate::mirror::types::MirrorBlock,
    full_tx: bool,
) -> JsonRpcResult<et::Block<serde_json::Value>> {
    let base_fee = data.gas_price().await?;
    let window = format!(
        "timestamp=gte:{}&timestamp=lte:{}",
        block.timestamp.from, block.timestamp.to
    );
    let results = data.mirror.contract_results(&window).await?;
    let results: Vec<_> = results.into_iter().filter(is_listable).collect();

    let transactions = if full_tx {
        let mut txs = Vec::with_capacity(results.len());
        for result in &results {
            let (from, to) = resolved_parties(data, result).await?;
            let tx = to_eth_transaction(result, from, to)?;
            txs.push(serde_json::to_value(tx).context("failed to convert to JSON")?);
        }
        txs
    } else {
        results
            .iter()
            .filter_map(|r| r.hash.as_deref())
            .map(|h| serde_json::Value::String(trim_hash(h)))
            .collect()
    };

    Ok(to_eth_block(&block, transactions, base_fee)?)
}

/// Pick the transaction at `index` out of a block.
async fn transaction_by_index<S: SdkClient>(
    data: &JsonRpcData<S>,
    block: crate::mirror::types::MirrorBlock,
    index: et::U64,
) -> JsonRpcResult<Option<et::Transaction>> {
    let window = format!(
        "timestamp=gte:{}&timestamp=lte:{}",
        block.timestamp.from, block.timestamp.to
    );
    let results = data.mirror.contract_results(&window).await?;
    let result = results
        .into_iter()
        .filter(|r| is_listable(r))
        .find(|r| r.transaction_index == Some(index.as_u64()));

    match result {
        Some(result) => {
            let (from, to) = resolved_parties(data, &result).await?;
            Ok(Some(to_eth_transaction(&result, from, to)?))
        }
        None => Ok(None),
    }
}

/// Resolve the sender and receiver of a contract result to EVM addresses.
async fn resolved_parties<S: SdkClient>(
    data: &JsonRpcData<S>,
    result: &ContractResult,
) -> JsonRpcResult<(et::H160, Option<et::H160>)> {
    let from = match result.from.as_deref() {
        Some(from) => data.resolve_evm_address(parse_address(from)?).await,
        None => et::H160::zero(),
    };
    let to = match result.to.as_deref() {
        Some(to) => Some(data.resolve_evm_address(parse_address(to)?).await),
        None => None,
    };
    Ok((from, to))
}

/// The block parameter of the Mirror Node simulation endpoint.
fn block_param(tag: Option<BlockNumber>) -> String {
    match tag {
        Some(BlockNumber::Number(n)) => to_quantity(n.as_u64()),
        Some(BlockNumber::Earliest) => "earliest".to_string(),
        Some(BlockNumber::Pending) => "pending".to_string(),
        _ => "latest".to_string(),
    }
}

/// Turn a simulation failure into the JSON-RPC error a client expects:
/// a revert with data becomes a contract revert, anything else an
/// execution error.
fn call_failure(e: anyhow::Error) -> JsonRpcError {
    match e.downcast_ref::<MirrorCallFailure>() {
        Some(failure) => {
            let message = failure.to_string();
            match &failure.data {
                Some(data) if data != "0x" && !data.is_empty() => {
                    let reason = hex::decode(data.strip_prefix("0x").unwrap_or(data))
                        .ok()
                        .and_then(|bytes| decode_revert_reason(&bytes));
                    let message = match reason {
                        Some(reason) => format!("{message}: {reason}"),
                        None => message,
                    };
                    JsonRpcError {
                        code: ErrorCode::ContractRevert.value(),
                        message,
                        data: Some(serde_json::Value::String(data.clone())),
                    }
                }
                _ => JsonRpcError::new(ErrorCode::ExecutionError, message),
            }
        }
        None => e.into(),
    }
}

pub use params::{CallParams, RawTransactionParams, SubscribeParams};

mod params {
    use ethers_core::types::{self as et, BlockNumber};
    use serde::Deserialize;

    use crate::conv::from_eth::CallObject;
    use crate::state::WebSocketId;

    /// The client sends one or two items, depending on whether a block tag
    /// is given. An `Option` would force clients to send `null`; this way
    /// both arities work.
    #[derive(Deserialize)]
    #[serde(untagged)]
    pub enum CallParams {
        One((CallObject,)),
        Two((CallObject, BlockNumber)),
    }

    impl CallParams {
        pub fn into_parts(self) -> (CallObject, Option<BlockNumber>) {
            match self {
                CallParams::One((call,)) => (call, None),
                CallParams::Two((call, tag)) => (call, Some(tag)),
            }
        }
    }

    /// Raw transaction bytes, possibly followed by the API key the
    /// authorization layer appended for budget accounting.
    #[derive(Deserialize)]
    #[serde(untagged)]
    pub enum RawTransactionParams {
        One((et::Bytes,)),
        Two((et::Bytes, String)),
    }

    impl RawTransactionParams {
        pub fn into_parts(self) -> (Vec<u8>, Option<String>) {
            match self {
                RawTransactionParams::One((raw,)) => (raw.to_vec(), None),
                RawTransactionParams::Two((raw, key)) => (raw.to_vec(), Some(key)),
            }
        }
    }

    /// The subscription event name, optional log filter, and the WebSocket
    /// id the connection handler appended.
    #[derive(Deserialize)]
    #[serde(untagged)]
    #[allow(clippy::large_enum_variant)]
    pub enum SubscribeParams {
        One((String, WebSocketId)),
        Two((String, et::Filter, WebSocketId)),
    }

}

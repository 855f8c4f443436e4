// SPDX-License-Identifier: MIT OR Apache-2.0

// See https://ethereum.org/en/developers/docs/apis/json-rpc/#json-rpc-methods
// and https://ethereum.github.io/execution-apis/api-documentation/

use jsonrpc_v2::{MapRouter, ServerBuilder};
use paste::paste;

use crate::consensus::SdkClient;
use crate::settings::Settings;

mod debug;
mod eth;
mod net;
mod web3;

macro_rules! with_methods {
    ($server:ident, $module:ident, $client:ident, { $($method:ident),* }) => {
        paste!{
            $server
                $(.with_method(
                    stringify!([< $module _ $method >]),
                    $module :: [< $method:snake >] ::<$client>
                ))*
        }
    };
}

/// Register the method handlers. The filter and debug groups are only
/// registered when their feature flags are on; a disabled method answers
/// with "method not found".
pub fn register_methods<S: SdkClient>(
    server: ServerBuilder<MapRouter>,
    settings: &Settings,
) -> ServerBuilder<MapRouter> {
    let server = with_methods!(server, eth, S, {
        accounts,
        blockNumber,
        call,
        chainId,
        estimateGas,
        feeHistory,
        gasPrice,
        getBalance,
        getBlockByHash,
        getBlockByNumber,
        getBlockReceipts,
        getBlockTransactionCountByHash,
        getBlockTransactionCountByNumber,
        getCode,
        getLogs,
        getStorageAt,
        getTransactionByBlockHashAndIndex,
        getTransactionByBlockNumberAndIndex,
        getTransactionByHash,
        getTransactionCount,
        getTransactionReceipt,
        getUncleByBlockHashAndIndex,
        getUncleByBlockNumberAndIndex,
        getUncleCountByBlockHash,
        getUncleCountByBlockNumber,
        hashrate,
        maxPriorityFeePerGas,
        mining,
        sendRawTransaction,
        syncing,
        subscribe,
        unsubscribe
    });

    let server = if settings.features.filter_api_enabled {
        with_methods!(server, eth, S, {
            getFilterChanges,
            getFilterLogs,
            newBlockFilter,
            newFilter,
            newPendingTransactionFilter,
            uninstallFilter
        })
    } else {
        server
    };

    let server = if settings.features.debug_api_enabled {
        with_methods!(server, debug, S, { traceTransaction })
    } else {
        server
    };

    let server = with_methods!(server, web3, S, {
        clientVersion,
        sha3
    });

    with_methods!(server, net, S, {
        version,
        listening
    })
}

/// Indicate whether a method requires a WebSocket connection.
pub fn is_streaming_method(method: &str) -> bool {
    method == "eth_subscribe"
}

/// Methods whose parameters get the caller's API key appended by the
/// authorization layer, so they can charge hbar budgets.
pub fn is_charged_method(method: &str) -> bool {
    method == "eth_sendRawTransaction"
}

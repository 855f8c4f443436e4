// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::consensus::SdkClient;
use crate::{JsonRpcData, JsonRpcResult};

/// The network id, which matches the chain id, in decimal.
pub async fn version<S: SdkClient>(data: JsonRpcData<S>) -> JsonRpcResult<String> {
    Ok(data.settings.hedera.chain_id.to_string())
}

/// The relay does not take part in peer-to-peer networking.
pub async fn listening<S: SdkClient>(_data: JsonRpcData<S>) -> JsonRpcResult<bool> {
    Ok(false)
}

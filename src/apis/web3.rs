// SPDX-License-Identifier: MIT OR Apache-2.0

use anyhow::Context;
use ethers_core::utils::keccak256;
use jsonrpc_v2::Params;

use crate::consensus::SdkClient;
use crate::{JsonRpcData, JsonRpcResult};

/// Returns the current client version.
pub async fn client_version<S: SdkClient>(data: JsonRpcData<S>) -> JsonRpcResult<String> {
    Ok(format!("relay/{}", data.settings.application.version))
}

/// Returns Keccak-256 (not the standardized SHA3-256) of the given data.
pub async fn sha3<S: SdkClient>(
    _data: JsonRpcData<S>,
    Params((input,)): Params<(String,)>,
) -> JsonRpcResult<String> {
    let input = input.strip_prefix("0x").unwrap_or(&input);
    let input = hex::decode(input).context("failed to decode input as hex")?;
    Ok(format!("0x{}", hex::encode(keccak256(input))))
}

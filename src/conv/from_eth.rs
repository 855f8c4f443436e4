// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoding of wire-format Ethereum transactions and normalisation of call
//! objects into Mirror Node simulation requests.

use anyhow::Context;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{self as et, U256};
use ethers_core::utils::{keccak256, rlp};
use serde::Deserialize;

use crate::conv::TINYBAR_TO_WEIBAR_COEF;
use crate::error::{error, ErrorCode, JsonRpcError};
use crate::mirror::types::ContractCallRequest;

/// First byte of an EIP-2718 blob transaction envelope, which the network
/// does not support.
const EIP4844_TYPE_BYTE: u8 = 0x03;

/// A raw transaction after RLP decoding and sender recovery.
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
    pub tx: TypedTransaction,
    pub signature: et::Signature,
    /// Keccak-256 of the raw bytes; the hash Ethereum tooling tracks.
    pub hash: et::TxHash,
    /// Sender recovered from the EIP-155 signing hash.
    pub from: et::Address,
}

impl DecodedTransaction {
    /// Envelope type: 0 legacy, 1 EIP-2930, 2 EIP-1559.
    pub fn tx_type(&self) -> u8 {
        match self.tx {
            TypedTransaction::Legacy(_) => 0,
            TypedTransaction::Eip2930(_) => 1,
            TypedTransaction::Eip1559(_) => 2,
        }
    }

    /// A legacy transaction signed without replay protection carries no
    /// chain id and `v` of 27 or 28.
    pub fn is_legacy_unprotected(&self) -> bool {
        matches!(self.tx, TypedTransaction::Legacy(_))
            && self.tx.chain_id().is_none()
            && (self.signature.v == 27 || self.signature.v == 28)
    }

    /// The price the sender offers per gas: `gasPrice` for legacy and 2930
    /// envelopes, `maxFeePerGas + maxPriorityFeePerGas` for 1559.
    pub fn effective_gas_offer(&self) -> U256 {
        match &self.tx {
            TypedTransaction::Eip1559(tx) => {
                tx.max_fee_per_gas.unwrap_or_default()
                    + tx.max_priority_fee_per_gas.unwrap_or_default()
            }
            other => other.gas_price().unwrap_or_default(),
        }
    }
}

/// Decode a raw transaction. The leading byte selects the envelope: `0x01`,
/// `0x02` and `0x03` are typed, anything at `0x7f` or above is a legacy RLP
/// list.
pub fn decode_raw_transaction(raw: &[u8]) -> Result<DecodedTransaction, JsonRpcError> {
    if raw.is_empty() {
        return error(ErrorCode::InvalidParams, "empty transaction data");
    }
    if raw[0] == EIP4844_TYPE_BYTE {
        return error(
            ErrorCode::UnsupportedTransactionType,
            "blob transactions are not supported",
        );
    }

    let rlp = rlp::Rlp::new(raw);
    let (tx, signature) = TypedTransaction::decode_signed(&rlp)
        .context("failed to decode RLP as a signed transaction")?;

    let from = signature
        .recover(tx.sighash())
        .context("failed to recover the transaction signer")?;

    Ok(DecodedTransaction {
        tx,
        signature,
        hash: et::TxHash::from(keccak256(raw)),
        from,
    })
}

/// A call object as clients send it to `eth_call` and `eth_estimateGas`.
/// Some tooling populates `data`, some `input`, some both.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallObject {
    pub from: Option<et::Address>,
    pub to: Option<et::Address>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
    pub data: Option<et::Bytes>,
    pub input: Option<et::Bytes>,
}

impl CallObject {
    /// Normalise into the body of the Mirror Node simulation endpoint.
    ///
    /// `operator` becomes the sender of value-bearing calls that name none,
    /// so the simulation has an account to draw the value from.
    pub fn into_mirror_call(
        self,
        block: Option<String>,
        estimate: bool,
        operator: et::Address,
    ) -> Result<ContractCallRequest, JsonRpcError> {
        let data = match (self.data, self.input) {
            (Some(data), Some(input)) if data != input => {
                return error(
                    ErrorCode::InvalidParams,
                    "both data and input are set and they differ",
                );
            }
            (data, input) => data.or(input),
        };

        let value = self.value.map(weibars_to_tinybars_rounded);
        let from = match self.from {
            Some(from) => Some(from),
            None if value.unwrap_or_default() > 0 => Some(operator),
            None => None,
        };

        Ok(ContractCallRequest {
            block,
            data: data.map(|d| format!("0x{}", hex::encode(&d))),
            estimate,
            from: from.map(|f| format!("{f:#x}")),
            gas: self.gas.map(to_u64).transpose()?,
            gas_price: self.gas_price.map(to_u64).transpose()?,
            to: self.to.map(|t| format!("{t:#x}")),
            value,
        })
    }
}

fn to_u64(value: U256) -> Result<u64, JsonRpcError> {
    u64::try_from(value).map_err(|_| JsonRpcError::new(ErrorCode::InvalidParams, "value too large"))
}

/// Weibars to tinybars for call values. Sub-tinybar values round up to one
/// tinybar when they are at least half a tinybar, otherwise down to zero;
/// anything larger is floored.
fn weibars_to_tinybars_rounded(weibars: U256) -> u64 {
    let coef = *TINYBAR_TO_WEIBAR_COEF;
    if weibars < coef {
        if weibars >= coef / 2 {
            1
        } else {
            0
        }
    } else {
        (weibars / coef).low_u64()
    }
}

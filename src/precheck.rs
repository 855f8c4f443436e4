// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validation of decoded transactions before anything is submitted to a
//! consensus node. A failed precheck aborts the send path without spending
//! operator funds.

use ethers_core::types::U256;

use crate::conv::from_eth::DecodedTransaction;
use crate::conv::{tinybars_to_weibars, TINYBAR_TO_WEIBAR_COEF};
use crate::error::{error, ErrorCode, JsonRpcError};
use crate::mirror::types::MirrorAccount;

/// Raw transactions above this size are rejected outright.
pub const MAX_TRANSACTION_SIZE: usize = 128 * 1024;

/// Gas a transaction may name at most.
const MAX_GAS_PER_TRANSACTION: u64 = 15_000_000;

/// Base cost of any transaction.
const TX_BASE_COST: u64 = 21_000;
const TX_DATA_ZERO_COST: u64 = 4;
const TX_DATA_NONZERO_COST: u64 = 16;

pub struct Precheck {
    chain_id: u64,
}

impl Precheck {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    /// Run every check in order; the first failure wins.
    pub fn check(
        &self,
        tx: &DecodedTransaction,
        raw_size: usize,
        sender: &MirrorAccount,
        receiver: Option<&MirrorAccount>,
        network_gas_price: U256,
    ) -> Result<(), JsonRpcError> {
        self.check_size(raw_size)?;
        self.check_chain_id(tx)?;
        self.check_gas_limit(tx)?;
        self.check_gas_price(tx, network_gas_price)?;
        self.check_value(tx)?;
        self.check_nonce(tx, sender)?;
        self.check_balance(tx, sender)?;
        self.check_receiver(receiver)?;
        Ok(())
    }

    pub fn check_size(&self, raw_size: usize) -> Result<(), JsonRpcError> {
        if raw_size > MAX_TRANSACTION_SIZE {
            return error(
                ErrorCode::OversizedData,
                format!(
                    "transaction size {raw_size} exceeds the {MAX_TRANSACTION_SIZE} byte limit"
                ),
            );
        }
        Ok(())
    }

    fn check_chain_id(&self, tx: &DecodedTransaction) -> Result<(), JsonRpcError> {
        // Pre-EIP-155 transactions carry no chain id and stay valid.
        if tx.is_legacy_unprotected() {
            return Ok(());
        }
        let chain_id = tx.tx.chain_id().map(|c| c.as_u64()).unwrap_or_default();
        if chain_id != self.chain_id {
            return error(
                ErrorCode::ServerError,
                format!(
                    "chain id {chain_id} does not match the relay chain id {}",
                    self.chain_id
                ),
            );
        }
        Ok(())
    }

    fn check_gas_limit(&self, tx: &DecodedTransaction) -> Result<(), JsonRpcError> {
        let gas = tx.tx.gas().copied().unwrap_or_default();
        let intrinsic = intrinsic_gas(tx.tx.data().map(|d| d.as_ref()).unwrap_or_default());

        if gas < U256::from(intrinsic) {
            return error(
                ErrorCode::GasLimitTooLow,
                format!("gas limit {gas} is below the intrinsic cost {intrinsic}"),
            );
        }
        if gas > U256::from(MAX_GAS_PER_TRANSACTION) {
            return error(
                ErrorCode::GasLimitTooHigh,
                format!("gas limit {gas} exceeds the {MAX_GAS_PER_TRANSACTION} gas ceiling"),
            );
        }
        Ok(())
    }

    fn check_gas_price(
        &self,
        tx: &DecodedTransaction,
        network_gas_price: U256,
    ) -> Result<(), JsonRpcError> {
        // One weibar of tolerance absorbs rounding in client fee estimators.
        let offered = tx.effective_gas_offer() + U256::one();
        if offered < network_gas_price {
            return error(
                ErrorCode::GasPriceTooLow,
                format!(
                    "gas price {} is below the network gas price {network_gas_price}",
                    tx.effective_gas_offer()
                ),
            );
        }
        Ok(())
    }

    fn check_value(&self, tx: &DecodedTransaction) -> Result<(), JsonRpcError> {
        let value = tx.tx.value().copied().unwrap_or_default();
        if !value.is_zero() && value < *TINYBAR_TO_WEIBAR_COEF {
            return error(
                ErrorCode::InvalidParams,
                "value is below 10^10 wei, the smallest representable tinybar",
            );
        }
        Ok(())
    }

    fn check_nonce(
        &self,
        tx: &DecodedTransaction,
        sender: &MirrorAccount,
    ) -> Result<(), JsonRpcError> {
        let account_nonce = sender.ethereum_nonce.unwrap_or_default();
        let tx_nonce = tx.tx.nonce().copied().unwrap_or_default();
        if tx_nonce < U256::from(account_nonce) {
            return error(
                ErrorCode::NonceTooLow,
                format!("nonce {tx_nonce} is below the account nonce {account_nonce}"),
            );
        }
        Ok(())
    }

    fn check_balance(
        &self,
        tx: &DecodedTransaction,
        sender: &MirrorAccount,
    ) -> Result<(), JsonRpcError> {
        let balance = sender
            .balance
            .as_ref()
            .map(|b| b.balance)
            .unwrap_or_default();
        let balance = tinybars_to_weibars(balance);

        let value = tx.tx.value().copied().unwrap_or_default();
        let gas = tx.tx.gas().copied().unwrap_or_default();
        let required = value + tx.effective_gas_offer() * gas;

        if balance < required {
            return error(
                ErrorCode::InsufficientFunds,
                format!("balance {balance} cannot cover value plus gas of {required}"),
            );
        }
        Ok(())
    }

    fn check_receiver(&self, receiver: Option<&MirrorAccount>) -> Result<(), JsonRpcError> {
        if let Some(receiver) = receiver {
            if receiver.receiver_sig_required.unwrap_or_default() {
                return error(
                    ErrorCode::ServerError,
                    "destination account requires a receiver signature",
                );
            }
        }
        Ok(())
    }
}

/// `21000 + 4·zeros + 16·non-zeros` over the call data.
fn intrinsic_gas(data: &[u8]) -> u64 {
    let zeros = data.iter().filter(|b| **b == 0).count() as u64;
    let non_zeros = data.len() as u64 - zeros;
    TX_BASE_COST + TX_DATA_ZERO_COST * zeros + TX_DATA_NONZERO_COST * non_zeros
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::from_eth::DecodedTransaction;
    use crate::error::ErrorCode;
    use ethers_core::types::transaction::eip2718::TypedTransaction;
    use ethers_core::types::{
        Eip1559TransactionRequest, Signature, TransactionRequest, H160, H256,
    };

    const CHAIN_ID: u64 = 296;

    fn decoded(tx: TypedTransaction, v: u64) -> DecodedTransaction {
        DecodedTransaction {
            tx,
            signature: Signature {
                r: U256::one(),
                s: U256::one(),
                v,
            },
            hash: H256::zero(),
            from: H160::zero(),
        }
    }

    fn legacy(nonce: u64, gas: u64, gas_price: u64, value: u64) -> DecodedTransaction {
        let tx = TransactionRequest::new()
            .chain_id(CHAIN_ID)
            .nonce(nonce)
            .gas(gas)
            .gas_price(gas_price)
            .value(value)
            .data(vec![0x01, 0x00]);
        decoded(TypedTransaction::Legacy(tx), 627)
    }

    fn account(nonce: u64, balance_tinybars: u64) -> MirrorAccount {
        serde_json::from_value(serde_json::json!({
            "account": "0.0.1001",
            "evm_address": "0x00000000000000000000000000000000000003e9",
            "ethereum_nonce": nonce,
            "balance": { "balance": balance_tinybars, "timestamp": "1.0" },
            "receiver_sig_required": false
        }))
        .unwrap()
    }

    fn check(tx: &DecodedTransaction) -> Result<(), crate::error::JsonRpcError> {
        Precheck::new(CHAIN_ID).check(tx, 100, &account(0, u64::MAX), None, U256::from(710u64))
    }

    #[test]
    fn accepts_a_well_formed_transaction() {
        assert!(check(&legacy(0, 50_000, 1_000, 0)).is_ok());
    }

    #[test]
    fn rejects_oversized_payloads() {
        let err = Precheck::new(CHAIN_ID)
            .check_size(MAX_TRANSACTION_SIZE + 1)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::OversizedData.value());
        assert!(Precheck::new(CHAIN_ID).check_size(MAX_TRANSACTION_SIZE).is_ok());
    }

    #[test]
    fn rejects_foreign_chain_ids() {
        let tx = TransactionRequest::new()
            .chain_id(1u64)
            .nonce(0)
            .gas(50_000)
            .gas_price(1_000);
        let err = check(&decoded(TypedTransaction::Legacy(tx), 37)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerError.value());
        assert!(err.message.contains("chain id"));
    }

    #[test]
    fn accepts_unprotected_legacy_on_any_chain() {
        let tx = TransactionRequest::new().nonce(0).gas(50_000).gas_price(1_000);
        assert!(check(&decoded(TypedTransaction::Legacy(tx), 27)).is_ok());
    }

    #[test]
    fn gas_limit_bounds() {
        // Intrinsic cost of the 2-byte payload is 21000 + 16 + 4.
        let err = check(&legacy(0, 21_019, 1_000, 0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::GasLimitTooLow.value());
        assert!(check(&legacy(0, 21_020, 1_000, 0)).is_ok());

        let err = check(&legacy(0, 15_000_001, 1_000, 0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::GasLimitTooHigh.value());
    }

    #[test]
    fn gas_price_floor_with_tolerance() {
        let err = check(&legacy(0, 50_000, 708, 0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::GasPriceTooLow.value());
        // One weibar below the network price is tolerated.
        assert!(check(&legacy(0, 50_000, 709, 0)).is_ok());
    }

    #[test]
    fn eip1559_uses_fee_cap_plus_tip() {
        let tx = Eip1559TransactionRequest::new()
            .chain_id(CHAIN_ID)
            .nonce(0)
            .gas(50_000)
            .max_fee_per_gas(700)
            .max_priority_fee_per_gas(10);
        assert!(check(&decoded(TypedTransaction::Eip1559(tx), 1)).is_ok());

        let tx = Eip1559TransactionRequest::new()
            .chain_id(CHAIN_ID)
            .nonce(0)
            .gas(50_000)
            .max_fee_per_gas(700)
            .max_priority_fee_per_gas(8);
        let err = check(&decoded(TypedTransaction::Eip1559(tx), 1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::GasPriceTooLow.value());
    }

    #[test]
    fn sub_tinybar_values_are_rejected() {
        let err = check(&legacy(0, 50_000, 1_000, 9_999_999_999)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams.value());
        assert!(check(&legacy(0, 50_000, 1_000, 10_000_000_000)).is_ok());
    }

    #[test]
    fn stale_nonces_are_rejected() {
        let precheck = Precheck::new(CHAIN_ID);
        let tx = legacy(4, 50_000, 1_000, 0);
        let err = precheck
            .check(&tx, 100, &account(5, u64::MAX), None, U256::from(710u64))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NonceTooLow.value());

        // Equal and future nonces pass.
        assert!(precheck
            .check(&tx, 100, &account(4, u64::MAX), None, U256::from(710u64))
            .is_ok());
        assert!(precheck
            .check(&tx, 100, &account(2, u64::MAX), None, U256::from(710u64))
            .is_ok());
    }

    #[test]
    fn balance_must_cover_value_and_gas() {
        let precheck = Precheck::new(CHAIN_ID);
        // Needs 100 tinybars of value plus 50_000 gas at 1_000 weibars,
        // which is 100.000005 tinybars in total.
        let tx = legacy(0, 50_000, 1_000, 100 * 10_000_000_000);
        let err = precheck
            .check(&tx, 100, &account(0, 100), None, U256::from(710u64))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InsufficientFunds.value());

        assert!(precheck
            .check(&tx, 100, &account(0, 101), None, U256::from(710u64))
            .is_ok());
    }

    #[test]
    fn receiver_signature_requirement_blocks_submission() {
        let precheck = Precheck::new(CHAIN_ID);
        let mut receiver = account(0, 0);
        receiver.receiver_sig_required = Some(true);

        let tx = legacy(0, 50_000, 1_000, 0);
        let err = precheck
            .check(
                &tx,
                100,
                &account(0, u64::MAX),
                Some(&receiver),
                U256::from(710u64),
            )
            .unwrap_err();
        assert!(err.message.contains("receiver signature"));
    }

    #[test]
    fn intrinsic_gas_costs() {
        assert_eq!(intrinsic_gas(&[]), 21_000);
        assert_eq!(intrinsic_gas(&[0, 0]), 21_008);
        assert_eq!(intrinsic_gas(&[1, 0xff]), 21_032);
    }
}

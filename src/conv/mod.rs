// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helper methods to convert between Ethereum and Hedera data formats.

use anyhow::{anyhow, Context};
use ethers_core::types::U256;
use lazy_static::lazy_static;

pub mod from_eth;
pub mod from_mirror;

lazy_static! {
    /// 1 tinybar = 10^10 weibars.
    pub static ref TINYBAR_TO_WEIBAR_COEF: U256 = U256::from(10_000_000_000u64);
}

/// Convert a tinybar amount to weibars. Exact; cannot overflow a `U256`.
pub fn tinybars_to_weibars(tinybars: impl Into<U256>) -> U256 {
    tinybars.into() * *TINYBAR_TO_WEIBAR_COEF
}

/// Convert a weibar amount to tinybars, discarding any sub-tinybar remainder.
pub fn weibars_to_tinybars(weibars: U256) -> U256 {
    weibars / *TINYBAR_TO_WEIBAR_COEF
}

/// Format a quantity the way Ethereum clients expect: lowercase hex, a single
/// `0x` prefix and no leading zeros (`0x0` for zero).
pub fn to_quantity(value: impl Into<U256>) -> String {
    format!("{:#x}", value.into())
}

/// Parse a `0x`-prefixed hexadecimal quantity.
pub fn parse_quantity(s: &str) -> anyhow::Result<U256> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("quantity is missing the 0x prefix: {s}"))?;
    U256::from_str_radix(digits, 16).with_context(|| format!("failed to parse quantity {s}"))
}

/// Trim a block or transaction hash to the 32-byte form (`0x` + 64 digits).
/// The Mirror Node pads block hashes to 48 bytes.
pub fn trim_hash(hash: &str) -> String {
    if hash.len() > 66 {
        hash[..66].to_string()
    } else {
        hash.to_string()
    }
}

/// A Mirror Node timestamp of the form `seconds.nanoseconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub seconds: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let (secs, nanos) = s
            .split_once('.')
            .ok_or_else(|| anyhow!("timestamp has no nanosecond part: {s}"))?;
        Ok(Self {
            seconds: secs.parse().context("invalid timestamp seconds")?,
            nanos: nanos.parse().context("invalid timestamp nanos")?,
        })
    }

    /// Whole seconds elapsed since an earlier timestamp.
    pub fn seconds_since(&self, earlier: &Timestamp) -> i64 {
        self.seconds as i64 - earlier.seconds as i64
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

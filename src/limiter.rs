// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-API-key request and hbar budgets, plus the global operator budget.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::settings::{Settings, TierSettings};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitError {
    /// The API key is not configured.
    UnknownKey,
    /// The key exhausted its requests-per-minute quota.
    TooManyRequests,
    /// The key's hbar bucket or the operator budget cannot cover the charge.
    BudgetExhausted,
}

impl std::fmt::Display for LimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitError::UnknownKey => write!(f, "unknown API key"),
            LimitError::TooManyRequests => write!(f, "request rate limit exceeded"),
            LimitError::BudgetExhausted => write!(f, "hbar budget exhausted"),
        }
    }
}

impl std::error::Error for LimitError {}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    requests: u32,
    hbar_spent: u64,
    window_start: Instant,
}

struct Inner {
    /// Tier name to its quotas.
    tiers: HashMap<String, TierSettings>,
    /// API key to tier name.
    keys: HashMap<String, String>,
    /// Per-key counters within the current window.
    buckets: HashMap<String, Bucket>,
    /// Remaining operator budget in tinybars, shared by all keys.
    operator_budget: u64,
}

/// Serialisation: a single mutex covers the tier maps, the per-key counters
/// and the operator budget, so a request-check and an hbar-deduction never
/// interleave halfway.
pub struct RateLimiter {
    inner: Mutex<Inner>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(settings: &Settings) -> Self {
        Self::with_window(settings, WINDOW)
    }

    fn with_window(settings: &Settings, window: Duration) -> Self {
        let keys = settings
            .api_keys
            .iter()
            .map(|k| (k.key.clone(), k.tier.clone()))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                tiers: settings.limiter.clone(),
                keys,
                buckets: HashMap::new(),
                operator_budget: settings.hedera.hbar_budget,
            }),
            window,
        }
    }

    /// Look up the tier configuration of an API key.
    pub fn tier(&self, api_key: &str) -> Option<TierSettings> {
        let inner = self.inner.lock().expect("limiter poisoned");
        let tier = inner.keys.get(api_key)?;
        inner.tiers.get(tier).copied()
    }

    /// Count a request against the key's per-minute quota.
    pub fn check_limits(&self, api_key: &str) -> Result<(), LimitError> {
        let mut inner = self.inner.lock().expect("limiter poisoned");
        let tier = inner.lookup_tier(api_key)?;
        let bucket = inner.bucket(api_key, self.window);
        if bucket.requests >= tier.requests_per_minute {
            return Err(LimitError::TooManyRequests);
        }
        bucket.requests += 1;
        Ok(())
    }

    /// Charge tinybars against both the key's bucket and the operator budget.
    /// Neither is debited unless both can cover the amount.
    pub fn deduct_hbar(&self, api_key: &str, tinybars: u64) -> Result<(), LimitError> {
        let mut inner = self.inner.lock().expect("limiter poisoned");
        let tier = inner.lookup_tier(api_key)?;

        if inner.operator_budget < tinybars {
            return Err(LimitError::BudgetExhausted);
        }
        let bucket = inner.bucket(api_key, self.window);
        if bucket.hbar_spent + tinybars > tier.hbar_limit {
            return Err(LimitError::BudgetExhausted);
        }
        bucket.hbar_spent += tinybars;
        inner.operator_budget -= tinybars;
        Ok(())
    }
}

impl Inner {
    fn lookup_tier(&self, api_key: &str) -> Result<TierSettings, LimitError> {
        let tier = self.keys.get(api_key).ok_or(LimitError::UnknownKey)?;
        self.tiers
            .get(tier)
            .copied()
            .ok_or(LimitError::UnknownKey)
    }

    /// The key's bucket for the current window, rolling the window forward
    /// when the previous one is older than a minute.
    fn bucket(&mut self, api_key: &str, window: Duration) -> &mut Bucket {
        let now = Instant::now();
        let bucket = self
            .buckets
            .entry(api_key.to_string())
            .or_insert_with(|| Bucket {
                requests: 0,
                hbar_spent: 0,
                window_start: now,
            });
        if now.duration_since(bucket.window_start) > window {
            bucket.requests = 0;
            bucket.hbar_spent = 0;
            bucket.window_start = now;
        }
        bucket
    }
}

#[cfg(test)]
mod tests {
    use super::{LimitError, RateLimiter};
    use crate::settings::Settings;
    use config::{Config, File, FileFormat};
    use std::time::Duration;

    fn settings() -> Settings {
        let yaml = r#"
server: { port: 7546, type: http }
hedera:
  network: local
  operator_id: 0.0.2
  operator_evm_address: "0x05fba803be258049a27b820088bab1cad2058871"
  operator_key: key
  operator_key_format: HEX_ECDSA
  chain_id: 298
  hbar_budget: 1000
mirror_node:
  base_url: "http://localhost:5551/"
  web3_url: "http://localhost:8545/"
  timeout_seconds: 10
limiter:
  basic: { requests_per_minute: 2, hbar_limit: 600 }
api_keys:
  - { key: alpha, tier: basic }
  - { key: beta, tier: basic }
application: { version: 0.1.0 }
"#;
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn request_quota() {
        let limiter = RateLimiter::new(&settings());
        assert!(limiter.check_limits("alpha").is_ok());
        assert!(limiter.check_limits("alpha").is_ok());
        assert_eq!(
            limiter.check_limits("alpha"),
            Err(LimitError::TooManyRequests)
        );
        // A different key has its own bucket.
        assert!(limiter.check_limits("beta").is_ok());
        assert_eq!(
            limiter.check_limits("nope"),
            Err(LimitError::UnknownKey)
        );
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::with_window(&settings(), Duration::from_millis(10));
        assert!(limiter.check_limits("alpha").is_ok());
        assert!(limiter.check_limits("alpha").is_ok());
        assert!(limiter.check_limits("alpha").is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check_limits("alpha").is_ok());
    }

    #[test]
    fn hbar_budgets() {
        let limiter = RateLimiter::new(&settings());
        // Per-key limit is 600, operator budget 1000.
        assert!(limiter.deduct_hbar("alpha", 500).is_ok());
        assert_eq!(
            limiter.deduct_hbar("alpha", 200),
            Err(LimitError::BudgetExhausted)
        );
        assert!(limiter.deduct_hbar("beta", 400).is_ok());
        // Operator budget has 100 left even though beta's bucket has 200.
        assert_eq!(
            limiter.deduct_hbar("beta", 200),
            Err(LimitError::BudgetExhausted)
        );
        assert!(limiter.deduct_hbar("beta", 100).is_ok());
    }

    #[test]
    fn tier_lookup() {
        let limiter = RateLimiter::new(&settings());
        assert_eq!(limiter.tier("alpha").unwrap().requests_per_minute, 2);
        assert!(limiter.tier("nope").is_none());
    }
}

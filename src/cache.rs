// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ethers_core::types::{H160, U256};
use lru_time_cache::LruCache;

/// How long the latest block number and notification dedup keys are kept.
pub const SHORT_TTL: Duration = Duration::from_secs(1);

/// Capacity of each cache; entries expire by TTL long before this matters.
const CACHE_CAPACITY: usize = 100_000;

// The `LruCache` is wrapped in `Mutex` because even reading requires mutation.
#[derive(Clone)]
pub struct Cache<K, V> {
    cache: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> Cache<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(Mutex::new(LruCache::with_expiry_duration_and_capacity(
                ttl,
                CACHE_CAPACITY,
            ))),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.with(|c| c.insert(key, value));
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.with(|c| c.get(key).cloned())
    }

    /// Insert the key only if it is not present yet; returns whether the
    /// insert happened. Used for notification deduplication.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        self.with(|c| {
            if c.get(&key).is_some() {
                false
            } else {
                c.insert(key, value);
                true
            }
        })
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.with(|c| c.remove(key))
    }

    pub fn with<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut LruCache<K, V>) -> T,
    {
        let mut guard = self.cache.lock().expect("cache poisoned");
        f(&mut guard)
    }

    /// Drop expired entries. `LruCache` removes them on access, so touching
    /// the map is enough.
    fn sweep(&self) {
        self.with(|c| c.len());
    }
}

/// The named caches of the relay. Everything is keyed in memory only;
/// nothing survives a restart.
#[derive(Clone)]
pub struct RelayCaches {
    /// Latest block number; refreshed every second at most.
    pub block_number: Cache<(), u64>,
    /// Resolved EVM addresses of accounts, contracts and tokens.
    pub evm_address: Cache<H160, H160>,
    /// Network gas price in weibars.
    pub gas_price: Cache<(), U256>,
    /// Method responses keyed by method name and arguments.
    pub responses: Cache<String, serde_json::Value>,
    /// Subscription notification dedup keys.
    pub dedup: Cache<String, ()>,
}

impl RelayCaches {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            block_number: Cache::new(SHORT_TTL),
            evm_address: Cache::new(default_ttl),
            gas_price: Cache::new(default_ttl),
            responses: Cache::new(default_ttl),
            dedup: Cache::new(SHORT_TTL),
        }
    }

    fn sweep(&self) {
        self.block_number.sweep();
        self.evm_address.sweep();
        self.gas_price.sweep();
        self.responses.sweep();
        self.dedup.sweep();
    }
}

/// Evict expired entries in the background at the configured interval.
pub fn start_cache_sweeper(caches: RelayCaches, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            caches.sweep();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::{Cache, RelayCaches};
    use std::time::Duration;

    #[test]
    fn insert_get_remove() {
        let cache: Cache<String, u64> = Cache::new(Duration::from_secs(60));
        cache.insert("eth_blockNumber".into(), 42);
        assert_eq!(cache.get(&"eth_blockNumber".into()), Some(42));
        assert_eq!(cache.remove(&"eth_blockNumber".into()), Some(42));
        assert_eq!(cache.get(&"eth_blockNumber".into()), None);
        assert_eq!(cache.remove(&"eth_blockNumber".into()), None);
    }

    #[test]
    fn entries_expire() {
        let cache: Cache<u64, u64> = Cache::new(Duration::from_millis(10));
        cache.insert(1, 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn dedup_insert_if_absent() {
        let caches = RelayCaches::new(Duration::from_secs(60));
        assert!(caches.dedup.insert_if_absent("k".into(), ()));
        assert!(!caches.dedup.insert_if_absent("k".into(), ()));
    }
}

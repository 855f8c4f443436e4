// SPDX-License-Identifier: MIT OR Apache-2.0

//! Poll-based log and block filters, stored in the cache so an abandoned
//! filter ages out on its own.

use std::time::Duration;

use ethers_core::types::{self as et, BlockNumber};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::consensus::SdkClient;
use crate::conv::from_mirror::parse_hash;
use crate::error::{error, ErrorCode};
use crate::state::{fresh_id, JsonRpcState};
use crate::JsonRpcResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Log,
    NewBlock,
}

/// A filter as the relay tracks it between polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRecord {
    pub id: String,
    pub kind: FilterKind,
    pub from_block: Option<u64>,
    pub to_block: Option<BlockNumber>,
    pub addresses: Vec<et::H160>,
    pub topics: [Option<et::H256>; 4],
    /// The latest block at the time the filter was created.
    pub block_at_creation: u64,
    /// The block after the last one a poll has covered.
    pub last_queried: Option<u64>,
}

impl FilterRecord {
    /// The log query this filter stands for, from `from` to the latest block.
    fn to_log_filter(&self, from: Option<u64>) -> et::Filter {
        let mut filter = et::Filter::new();
        filter = match from.or(self.from_block) {
            Some(from) => filter.from_block(from),
            None => filter,
        };
        filter = match self.to_block {
            Some(to) => filter.to_block(to),
            None => filter,
        };
        if !self.addresses.is_empty() {
            filter.address = Some(et::ValueOrArray::Array(self.addresses.clone()));
        }
        for (i, topic) in self.topics.iter().enumerate() {
            filter.topics[i] = topic.map(|t| et::ValueOrArray::Value(Some(t)));
        }
        filter
    }
}

/// Filters live in a TTL'd cache under `filterId_<id>`; reads re-insert the
/// record so actively polled filters do not expire.
pub struct FilterStore {
    cache: Cache<String, FilterRecord>,
}

impl FilterStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::new(ttl),
        }
    }

    fn key(id: &str) -> String {
        format!("filterId_{id}")
    }

    pub fn insert(&self, record: FilterRecord) {
        self.cache.insert(Self::key(&record.id), record);
    }

    pub fn get(&self, id: &str) -> Option<FilterRecord> {
        let record = self.cache.get(&Self::key(id))?;
        // Refresh the TTL.
        self.cache.insert(Self::key(id), record.clone());
        Some(record)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.cache.remove(&Self::key(id)).is_some()
    }
}

/// What a `getFilterChanges` poll yields, depending on the filter kind.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum FilterChanges {
    Logs(Vec<et::Log>),
    BlockHashes(Vec<et::H256>),
}

impl<S: SdkClient> JsonRpcState<S> {
    /// Create a log filter. A `latest` lower bound is pinned to the current
    /// block so later polls have a concrete starting point.
    pub async fn new_log_filter(&self, filter: &et::Filter) -> JsonRpcResult<String> {
        let (from_block, to_block) = match filter.block_option {
            et::FilterBlockOption::Range {
                from_block,
                to_block,
            } => (from_block, to_block),
            et::FilterBlockOption::AtBlockHash(_) => {
                return error(
                    ErrorCode::InvalidParams,
                    "blockHash is not supported in filters",
                )
            }
        };

        let addresses = crate::state::filter_addresses(filter);
        let range = self
            .validate_block_range(from_block, to_block, addresses.len() > 1)
            .await?;
        let latest = self.latest_block_number().await?;

        let record = FilterRecord {
            id: fresh_id(),
            kind: FilterKind::Log,
            from_block: Some(range.from),
            to_block,
            addresses,
            topics: crate::state::filter_topics(filter),
            block_at_creation: latest,
            last_queried: None,
        };
        let id = record.id.clone();
        self.filters.insert(record);
        Ok(id)
    }

    /// Create a filter notifying about blocks minted after this point.
    pub async fn new_block_filter(&self) -> JsonRpcResult<String> {
        let latest = self.latest_block_number().await?;
        let record = FilterRecord {
            id: fresh_id(),
            kind: FilterKind::NewBlock,
            from_block: None,
            to_block: None,
            addresses: Vec::new(),
            topics: [None; 4],
            block_at_creation: latest,
            last_queried: None,
        };
        let id = record.id.clone();
        self.filters.insert(record);
        Ok(id)
    }

    pub fn uninstall_filter(&self, id: &str) -> bool {
        self.filters.remove(id)
    }

    /// All logs matching a log filter, from its original range.
    pub async fn filter_logs(&self, id: &str) -> JsonRpcResult<Vec<et::Log>> {
        let Some(record) = self.filters.get(id) else {
            return error(ErrorCode::NotFound, "filter not found");
        };
        if record.kind != FilterKind::Log {
            return error(ErrorCode::ServerError, "not a log filter");
        }
        self.get_logs(&record.to_log_filter(None)).await
    }

    /// Changes since the previous poll; advances the filter's cursor.
    pub async fn filter_changes(&self, id: &str) -> JsonRpcResult<FilterChanges> {
        let Some(mut record) = self.filters.get(id) else {
            return error(ErrorCode::NotFound, "filter not found");
        };

        match record.kind {
            FilterKind::Log => {
                let latest = self.latest_block_number().await?;
                let from = record.last_queried.or(record.from_block);
                let logs = self.get_logs(&record.to_log_filter(from)).await?;

                record.last_queried = logs
                    .iter()
                    .filter_map(|l| l.block_number)
                    .max()
                    .map(|n| n.as_u64() + 1)
                    .or(Some(latest));
                self.filters.insert(record);

                Ok(FilterChanges::Logs(logs))
            }
            FilterKind::NewBlock => {
                let since = record.last_queried.unwrap_or(record.block_at_creation);
                let blocks = self.mirror.blocks_after(since).await?;

                let mut hashes = Vec::new();
                for block in &blocks {
                    hashes.push(parse_hash(&block.hash)?);
                }
                if let Some(max) = blocks.iter().map(|b| b.number).max() {
                    record.last_queried = Some(max);
                }
                self.filters.insert(record);

                Ok(FilterChanges::BlockHashes(hashes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterKind, FilterRecord, FilterStore};
    use ethers_core::types::{BlockNumber, H160, H256};
    use std::time::Duration;

    fn record(id: &str) -> FilterRecord {
        FilterRecord {
            id: id.to_string(),
            kind: FilterKind::Log,
            from_block: Some(5),
            to_block: Some(BlockNumber::Latest),
            addresses: vec![H160::repeat_byte(1)],
            topics: [Some(H256::repeat_byte(2)), None, None, None],
            block_at_creation: 5,
            last_queried: None,
        }
    }

    #[test]
    fn store_round_trip() {
        let store = FilterStore::new(Duration::from_secs(60));
        store.insert(record("0xabc"));

        let found = store.get("0xabc").unwrap();
        assert_eq!(found.kind, FilterKind::Log);
        assert_eq!(found.from_block, Some(5));

        assert!(store.remove("0xabc"));
        assert!(!store.remove("0xabc"));
        assert!(store.get("0xabc").is_none());
    }

    #[test]
    fn records_survive_serialisation() {
        let json = serde_json::to_string(&record("0xdef")).unwrap();
        assert!(json.contains(r#""kind":"log""#));
        let back: FilterRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "0xdef");
        assert_eq!(back.topics[0], Some(H256::repeat_byte(2)));
    }

    #[test]
    fn log_filter_reconstruction() {
        let filter = record("0x1").to_log_filter(Some(10));
        assert_eq!(filter.get_from_block(), Some(BlockNumber::Number(10.into())));
        assert_eq!(filter.get_to_block(), Some(BlockNumber::Latest));
        let topics = crate::state::filter_topics(&filter);
        assert_eq!(topics[0], Some(H256::repeat_byte(2)));
    }
}
